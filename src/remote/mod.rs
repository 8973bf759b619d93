pub mod glacier;
pub mod mem;

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("service error: {0}")]
    Service(String),

    #[error("service response is missing {0}")]
    MissingField(&'static str),

    #[error("vault {0} does not exist")]
    NoSuchVault(String),

    #[error("multipart upload {0} does not exist")]
    NoSuchUpload(String),

    #[error("invalid range {range}: {reason}")]
    InvalidRange { range: String, reason: &'static str },

    #[error("checksum mismatch, expected {expected} but computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("archive size mismatch, expected {expected} but received {received}")]
    SizeMismatch { expected: u64, received: u64 },

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error("unable to start the client runtime")]
    Runtime(#[source] std::io::Error),
}

/// Inclusive byte range of one part within the archive, never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Range covering `len` bytes from `start`, `None` when `len` is zero or
    /// the range runs past `u64::MAX`.
    pub fn new(start: u64, len: u64) -> Option<Self> {
        let end = start.checked_add(len.checked_sub(1)?)?;
        Some(ByteRange { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte, inclusive.
    pub fn end(&self) -> u64 {
        self.end
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/*", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocation {
    pub archive_id: String,
    pub location: String,
    pub checksum: String,
}

/// The four calls of the archival service multipart protocol.
pub trait Vault {
    /// Create a vault, returns its location.
    fn create_vault(&self, name: &str) -> Result<String, RemoteError>;

    fn initiate_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<MultipartUpload, RemoteError>;

    fn upload_multipart_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        body: &[u8],
        checksum: &str,
    ) -> Result<(), RemoteError>;

    fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> Result<ArchiveLocation, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_format() {
        let range = ByteRange::new(0, 1024 * 1024).unwrap();
        assert_eq!(range.to_string(), "bytes 0-1048575/*");
        assert_eq!(range.len(), 1024 * 1024);

        let range = ByteRange::new(33554432, 1).unwrap();
        assert_eq!(range.to_string(), "bytes 33554432-33554432/*");
        assert_eq!((range.start(), range.end()), (33554432, 33554432));
    }

    #[test]
    fn range_never_empty_or_wrapping() {
        assert_eq!(ByteRange::new(0, 0), None);
        assert_eq!(ByteRange::new(7, 0), None);
        assert_eq!(ByteRange::new(u64::MAX, 2), None);

        let last = ByteRange::new(u64::MAX, 1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(ByteRange::new(0, u64::MAX).unwrap().len(), u64::MAX);
    }
}
