//! Upload of one file as one archive.
//!
//! The archiver stacks the transforms the caller asked for on top of the
//! file, cuts the result into tree hashed parts and walks the multipart
//! protocol: initiate, upload every part in stream order, complete. A part
//! that keeps failing abandons the whole upload, which is reported as
//! [`UploadOutcome::Aborted`] rather than as an error. Nothing is cleaned up
//! remotely, the service expires abandoned uploads on its own.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, error, info, warn};
use time::OffsetDateTime;

use crate::chunk::{PartLayout, TreeHashReader};
use crate::description::Description;
use crate::error::{Error, Result};
use crate::remote::{ArchiveLocation, ByteRange, RemoteError, Vault};
use crate::stream::compress::{compress, Compression};
use crate::stream::crypt::encrypt;
use crate::stream::Transform;

pub const DEFAULT_ATTEMPTS: u32 = 3;

/// How many times a single part is tried before the upload is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadConfig {
    pub layout: PartLayout,
    pub retry: RetryPolicy,
}

/// Per upload choices, everything optional.
#[derive(Default)]
pub struct UploadOptions<'a> {
    /// Existing vault to upload into, a dated vault is created otherwise
    pub vault: Option<&'a str>,
    /// Caller label recorded after the file name, such as the VM name
    pub tag: Option<&'a str>,
    pub passphrase: Option<&'a [u8]>,
    pub compression: Option<Compression>,
}

#[must_use]
#[derive(Debug)]
pub enum UploadOutcome {
    Completed(ArchiveLocation),
    Aborted {
        range: ByteRange,
        attempts: u32,
        error: RemoteError,
    },
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed(_))
    }
}

enum PartAttempt {
    Uploaded,
    Exhausted { attempts: u32, error: RemoteError },
}

/// Name for a vault created without one: `<yesterday>_<hostname>`.
///
/// Backups run after midnight, so the archive is filed under the day the
/// snapshot covers.
pub fn default_vault_name() -> Result<String> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let date = now.date();
    let yesterday = date.previous_day().unwrap_or(date);

    let host = hostname::get()
        .map_err(Error::VaultName)?
        .to_string_lossy()
        .into_owned();

    Ok(format!("{}_{}", yesterday, host))
}

pub struct Archiver<V: Vault> {
    vault: V,
    config: UploadConfig,
}

impl<V: Vault> Archiver<V> {
    pub fn new(vault: V, config: UploadConfig) -> Self {
        Archiver { vault, config }
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }

    /// Create `name`, or the default dated vault, and return its name.
    pub fn create_vault(&self, name: Option<&str>) -> Result<String> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => default_vault_name()?,
        };

        let location = self.vault.create_vault(&name)?;
        info!("Vault created: {}", location);
        Ok(name)
    }

    /// Upload the file at `path` as one archive.
    pub fn upload(&self, path: &Path, opts: &UploadOptions) -> Result<UploadOutcome> {
        let vault = match opts.vault.filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => self.create_vault(None)?,
        };

        let file = File::open(path).map_err(|source| Error::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.upload_reader(&vault, &name, file, opts)
    }

    /// Upload everything `reader` yields into `vault` as an archive called
    /// `name`.
    pub fn upload_reader<R: Read>(
        &self,
        vault: &str,
        name: &str,
        reader: R,
        opts: &UploadOptions,
    ) -> Result<UploadOutcome> {
        let (source, description) = build_chain(reader, name, opts)?;
        let description = description.to_string();
        let mut parts = TreeHashReader::new(source, self.config.layout);

        let upload = self.vault.initiate_multipart_upload(
            vault,
            &description,
            self.config.layout.part_size(),
        )?;
        info!(
            "Initiating multipart upload ({}) for {}: {}",
            upload.upload_id, name, upload.location
        );
        info!("{}", description);

        let mut pos: u64 = 0;
        for part in parts.by_ref() {
            let part = part?;
            let range = ByteRange::new(pos, part.data.len() as u64).ok_or(
                RemoteError::InvalidRange {
                    range: format!("bytes {}-", pos),
                    reason: "empty part",
                },
            )?;
            let checksum = part.checksum.to_hex();

            match self.upload_part(vault, &upload.upload_id, range, &part.data, &checksum) {
                PartAttempt::Uploaded => pos += range.len(),
                PartAttempt::Exhausted { attempts, error } => {
                    error!("Giving up on {} after {} attempts at {}", name, attempts, range);
                    return Ok(UploadOutcome::Aborted {
                        range,
                        attempts,
                        error,
                    });
                }
            }
        }

        let checksum = parts.archive_checksum()?.to_hex();
        debug!("{} parts, {} bytes, tree hash {}", parts.parts_read(), pos, checksum);

        let archive =
            self.vault
                .complete_multipart_upload(vault, &upload.upload_id, pos, &checksum)?;
        info!("Archive {} completed: {}", archive.archive_id, archive.location);

        Ok(UploadOutcome::Completed(archive))
    }

    fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        body: &[u8],
        checksum: &str,
    ) -> PartAttempt {
        let attempts = self.config.retry.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!("Uploading part: {}", range);

            match self
                .vault
                .upload_multipart_part(vault, upload_id, range, body, checksum)
            {
                Ok(()) => return PartAttempt::Uploaded,
                Err(e) if attempt >= attempts => {
                    error!("{}", e);
                    return PartAttempt::Exhausted { attempts, error: e };
                }
                Err(e) => warn!("{} (attempt {} of {})", e, attempt, attempts),
            }
        }
    }
}

// Compress then encrypt, collecting each transform tag in the order applied.
// Empty tags and passphrases count as not given.
fn build_chain<'r, R: Read + 'r>(
    reader: R,
    name: &str,
    opts: &UploadOptions,
) -> Result<(Box<dyn Read + 'r>, Description)> {
    let mut description = Description::new(name);
    if let Some(tag) = opts.tag.filter(|t| !t.is_empty()) {
        description.push(tag);
    }

    let mut source: Box<dyn Read + 'r> = Box::new(reader);

    if let Some(compression) = opts.compression {
        let comp = compress(source, compression)?;
        description.push(comp.tag());
        source = Box::new(comp);
    }

    if let Some(passphrase) = opts.passphrase.filter(|p| !p.is_empty()) {
        let enc = encrypt(source, passphrase)?;
        description.push(enc.tag());
        source = Box::new(enc);
    }

    Ok((source, description))
}
