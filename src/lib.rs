//! Archive virtual machine disk images to a tree hashed, multipart upload
//! archival store.
//!
//! A disk image is read as a stream, optionally compressed then encrypted
//! ([`stream`]), cut into tree hashed parts ([`chunk`]) and uploaded one
//! part at a time by an [`archive::Archiver`] against any [`remote::Vault`].
pub mod archive;
pub mod chunk;
pub mod description;
pub mod error;
pub mod hash;
pub mod remote;
pub mod stream;

mod buf;

pub use crate::archive::{Archiver, UploadConfig, UploadOptions, UploadOutcome};
pub use crate::error::{Error, Result};
