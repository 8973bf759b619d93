use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;
use crate::stream::{Engine, Transform, Transformer};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Bz2,
    Zstd,
}

impl Codec {
    /// Tag recorded in the archive description.
    pub fn tag(self) -> &'static str {
        match self {
            Codec::Bz2 => "bz2",
            Codec::Zstd => "zst",
        }
    }

    fn levels(self) -> (u32, u32) {
        match self {
            Codec::Bz2 => (1, 9),
            Codec::Zstd => (1, 22),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Bz2 => write!(f, "bz2"),
            Codec::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bz2" | "bzip2" => Ok(Codec::Bz2),
            "zst" | "zstd" => Ok(Codec::Zstd),
            _ => Err(format!("unknown codec {:?}, expected bz2 or zstd", s)),
        }
    }
}

/// A validated codec and level pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    codec: Codec,
    level: u32,
}

impl Compression {
    pub fn new(codec: Codec, level: u32) -> Result<Self, Error> {
        let (min, max) = codec.levels();
        if !(min..=max).contains(&level) {
            return Err(Error::InvalidCompressionLevel {
                codec: codec.tag(),
                level,
            });
        }
        Ok(Compression { codec, level })
    }

    pub fn bz2(level: u32) -> Result<Self, Error> {
        Compression::new(Codec::Bz2, level)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

pub type Compressor<R> = Transformer<R, CompressEngine>;

pub fn compress<R: Read>(reader: R, compression: Compression) -> std::io::Result<Compressor<R>> {
    let engine = match compression.codec {
        Codec::Bz2 => CompressEngine::Bz2(bzip2::write::BzEncoder::new(
            Vec::new(),
            bzip2::Compression::new(compression.level),
        )),
        Codec::Zstd => CompressEngine::Zstd(zstd::stream::write::Encoder::new(
            Vec::new(),
            compression.level as i32,
        )?),
    };
    Ok(Transformer::new(reader, engine))
}

// Each encoder writes into its own Vec which is emptied into the transform
// output after every call
pub enum CompressEngine {
    Bz2(bzip2::write::BzEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl CompressEngine {
    pub fn codec(&self) -> Codec {
        match self {
            CompressEngine::Bz2(_) => Codec::Bz2,
            CompressEngine::Zstd(_) => Codec::Zstd,
        }
    }

    fn sink(&mut self) -> &mut Vec<u8> {
        match self {
            CompressEngine::Bz2(enc) => enc.get_mut(),
            CompressEngine::Zstd(enc) => enc.get_mut(),
        }
    }
}

impl Engine for CompressEngine {
    fn update(&mut self, data: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            CompressEngine::Bz2(enc) => enc.write_all(data)?,
            CompressEngine::Zstd(enc) => enc.write_all(data)?,
        }
        out.append(self.sink());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            CompressEngine::Bz2(enc) => enc.try_finish()?,
            CompressEngine::Zstd(enc) => enc.do_finish()?,
        }
        out.append(self.sink());
        Ok(())
    }
}

impl<R: Read> Transform for Compressor<R> {
    fn tag(&self) -> String {
        self.engine().codec().tag().to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        b"Hello World! ".iter().cycle().take(len).copied().collect()
    }

    #[test]
    fn level_bounds() {
        assert!(Compression::bz2(0).is_err());
        assert!(Compression::bz2(1).is_ok());
        assert!(Compression::bz2(9).is_ok());
        assert!(Compression::bz2(10).is_err());
        assert!(Compression::new(Codec::Zstd, 22).is_ok());
        assert!(Compression::new(Codec::Zstd, 23).is_err());
    }

    #[test]
    fn codec_parse() {
        assert_eq!("bz2".parse::<Codec>().unwrap(), Codec::Bz2);
        assert_eq!("zstd".parse::<Codec>().unwrap(), Codec::Zstd);
        assert!("gzip".parse::<Codec>().is_err());
    }

    #[test]
    fn bz2_tag_and_roundtrip() {
        let data = sample(300 * 1024);
        let mut comp = compress(Cursor::new(data.clone()), Compression::bz2(9).unwrap()).unwrap();
        assert_eq!(comp.tag(), "bz2");

        let mut packed = Vec::new();
        comp.read_to_end(&mut packed).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(&packed[..3], b"BZh");

        let mut unpacked = Vec::new();
        bzip2::read::BzDecoder::new(&packed[..])
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn zstd_tag_and_roundtrip() {
        let data = sample(200 * 1024 + 3);
        let compression = Compression::new(Codec::Zstd, 3).unwrap();
        let mut comp = compress(Cursor::new(data.clone()), compression).unwrap();
        assert_eq!(comp.tag(), "zst");

        let mut packed = Vec::new();
        comp.read_to_end(&mut packed).unwrap();

        assert_eq!(zstd::stream::decode_all(&packed[..]).unwrap(), data);
    }

    #[test]
    fn empty_source_still_valid_stream() {
        let mut comp = compress(Cursor::new(vec![]), Compression::bz2(1).unwrap()).unwrap();

        let mut packed = Vec::new();
        comp.read_to_end(&mut packed).unwrap();
        assert!(!packed.is_empty());

        let mut unpacked = Vec::new();
        bzip2::read::BzDecoder::new(&packed[..])
            .read_to_end(&mut unpacked)
            .unwrap();
        assert!(unpacked.is_empty());
    }

    #[test]
    fn small_reads_match_bulk_read() {
        let data = sample(100 * 1024);
        let compression = Compression::bz2(5).unwrap();

        let mut bulk = Vec::new();
        compress(Cursor::new(data.clone()), compression)
            .unwrap()
            .read_to_end(&mut bulk)
            .unwrap();

        let mut comp = compress(Cursor::new(data), compression).unwrap();
        let mut stepped = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            match comp.read(&mut buf).unwrap() {
                0 => break,
                len => stepped.extend_from_slice(&buf[..len]),
            }
        }
        assert_eq!(stepped, bulk);
    }
}
