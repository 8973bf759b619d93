//! Archive description metadata.
//!
//! The description is the only record of which transforms were applied to
//! an archive. Segments are collected in application order (file name,
//! optional caller tag, compression tag, encryption tag) and written out
//! last applied first, separated by `|`, so the first segment read back is
//! the first transform to undo.
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const SEPARATOR: char = '|';
const AES_PREFIX: &str = "aes:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    segments: Vec<String>,
}

impl Description {
    pub fn new(file_name: &str) -> Self {
        Description {
            segments: vec![file_name.to_string()],
        }
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    /// Segments in the order they were applied.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn file_name(&self) -> &str {
        &self.segments[0]
    }

    /// IV of the encryption layer, if the archive was encrypted.
    pub fn encryption_iv(&self) -> Option<[u8; 16]> {
        self.segments
            .iter()
            .filter_map(|s| s.strip_prefix(AES_PREFIX))
            .find_map(|iv| {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(iv, &mut bytes).ok().map(|_| bytes)
            })
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().rev().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for Description {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::Description("empty description".to_string()));
        }
        let mut segments: Vec<String> = s.split(SEPARATOR).map(str::to_string).collect();
        segments.reverse();
        if segments[0].is_empty() {
            return Err(Error::Description(format!("no file name in {:?}", s)));
        }
        Ok(Description { segments })
    }
}
