use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to open source {}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0} is not supported by this stream")]
    UnsupportedOperation(&'static str),

    #[error("compression level {level} is out of range for {codec}")]
    InvalidCompressionLevel { codec: &'static str, level: u32 },

    #[error("chunks per part must be a power of two between 1 and 4096, got {0}")]
    InvalidPartSize(u32),

    #[error("archive checksum requested before every part was read")]
    PartsPending,

    #[error("unable to derive a default vault name")]
    VaultName(#[source] std::io::Error),

    #[error("malformed archive description: {0}")]
    Description(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
