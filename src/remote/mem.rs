use log::debug;
use rusqlite as rs;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::chunk::CHUNK_SIZE;
use crate::hash::{tree_hash, Digest};
use crate::remote::{ArchiveLocation, ByteRange, MultipartUpload, RemoteError, Vault};

/// Sqlite backed vault that checks every call against the service contract.
///
/// Lives in memory by default, or in a file for dry runs that should be
/// inspected afterward.
pub struct MemoryVault {
    conn: Connection,
}

/// A completed archive as the local vault stored it.
#[derive(Debug)]
pub struct StoredArchive {
    pub description: String,
    pub checksum: String,
    pub content: Vec<u8>,
}

impl MemoryVault {
    pub fn new(filename: Option<&str>) -> Result<Self, RemoteError> {
        let conn = match filename {
            None => Connection::open_in_memory()?,
            Some(f) => Connection::open(f)?,
        };

        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS vault (
                name VARCHAR PRIMARY KEY
             );
             CREATE TABLE IF NOT EXISTS upload (
                id VARCHAR PRIMARY KEY,
                vault VARCHAR NOT NULL,
                description VARCHAR NOT NULL,
                part_size INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS part (
                upload_id VARCHAR NOT NULL,
                start INTEGER NOT NULL,
                checksum VARCHAR NOT NULL,
                content BLOB NOT NULL,
                UNIQUE(upload_id, start)
             );
             CREATE TABLE IF NOT EXISTS archive (
                id VARCHAR PRIMARY KEY,
                vault VARCHAR NOT NULL,
                description VARCHAR NOT NULL,
                checksum VARCHAR NOT NULL,
                content BLOB NOT NULL
             );
             COMMIT;",
        )?;

        Ok(MemoryVault { conn })
    }

    pub fn read_archive(&self, vault: &str, archive_id: &str) -> Result<StoredArchive, RemoteError> {
        self.conn
            .prepare_cached(
                "SELECT description, checksum, content
                 FROM archive
                 WHERE vault = ?
                 AND id = ?",
            )?
            .query_row(rs::params![vault, archive_id], |row| {
                Ok(StoredArchive {
                    description: row.get(0)?,
                    checksum: row.get(1)?,
                    content: row.get(2)?,
                })
            })
            .optional()?
            .ok_or_else(|| RemoteError::Service(format!("no archive {} in {}", archive_id, vault)))
    }

    fn vault_exists(&self, vault: &str) -> Result<bool, RemoteError> {
        let found: Option<String> = self
            .conn
            .prepare_cached("SELECT name FROM vault WHERE name = ?")?
            .query_row(rs::params![vault], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    // (description, part_size) of an open upload in this vault
    fn upload(&self, vault: &str, upload_id: &str) -> Result<(String, u64), RemoteError> {
        self.conn
            .prepare_cached(
                "SELECT description, part_size
                 FROM upload
                 WHERE id = ?
                 AND vault = ?",
            )?
            .query_row(rs::params![upload_id, vault], |row| {
                let size: i64 = row.get(1)?;
                Ok((row.get(0)?, size as u64))
            })
            .optional()?
            .ok_or_else(|| RemoteError::NoSuchUpload(upload_id.to_string()))
    }
}

fn data_tree_hash(data: &[u8]) -> Digest {
    let leaves: Vec<Digest> = data.chunks(CHUNK_SIZE).map(Digest::of).collect();
    tree_hash(&leaves)
}

fn valid_part_size(part_size: u64) -> bool {
    let chunks = part_size / CHUNK_SIZE as u64;
    part_size % CHUNK_SIZE as u64 == 0 && chunks.is_power_of_two() && chunks <= 4096
}

impl Vault for MemoryVault {
    fn create_vault(&self, name: &str) -> Result<String, RemoteError> {
        self.conn
            .prepare_cached("INSERT OR IGNORE INTO vault (name) VALUES (?)")?
            .execute(rs::params![name])?;
        Ok(format!("/-/vaults/{}", name))
    }

    fn initiate_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<MultipartUpload, RemoteError> {
        if !self.vault_exists(vault)? {
            return Err(RemoteError::NoSuchVault(vault.to_string()));
        }
        if !valid_part_size(part_size) {
            return Err(RemoteError::Service(format!("invalid part size {}", part_size)));
        }

        let upload_id = Uuid::new_v4().simple().to_string();
        self.conn
            .prepare_cached(
                "INSERT INTO upload
                 (id, vault, description, part_size)
                 VALUES
                 (?, ?, ?, ?)",
            )?
            .execute(rs::params![upload_id, vault, description, part_size as i64])?;

        Ok(MultipartUpload {
            location: format!("/-/vaults/{}/multipart-uploads/{}", vault, upload_id),
            upload_id,
        })
    }

    fn upload_multipart_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        body: &[u8],
        checksum: &str,
    ) -> Result<(), RemoteError> {
        let (_, part_size) = self.upload(vault, upload_id)?;

        let invalid = |reason| RemoteError::InvalidRange {
            range: range.to_string(),
            reason,
        };
        if range.start() % part_size != 0 {
            return Err(invalid("start is not aligned to the part size"));
        }
        if range.len() != body.len() as u64 {
            return Err(invalid("length does not match the body"));
        }
        if range.len() > part_size {
            return Err(invalid("larger than the part size"));
        }

        let computed = data_tree_hash(body).to_hex();
        if computed != checksum {
            return Err(RemoteError::ChecksumMismatch {
                expected: checksum.to_string(),
                computed,
            });
        }

        // A part may be uploaded again, the last write wins
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO part
                 (upload_id, start, checksum, content)
                 VALUES
                 (?, ?, ?, ?)",
            )?
            .execute(rs::params![upload_id, range.start() as i64, checksum, body])?;

        debug!("stored part {} of {}", range, upload_id);
        Ok(())
    }

    fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> Result<ArchiveLocation, RemoteError> {
        let (description, part_size) = self.upload(vault, upload_id)?;

        let parts: Vec<(u64, Vec<u8>)> = self
            .conn
            .prepare_cached(
                "SELECT start, content
                 FROM part
                 WHERE upload_id = ?
                 ORDER BY start ASC",
            )?
            .query_map(rs::params![upload_id], |row| {
                let start: i64 = row.get(0)?;
                Ok((start as u64, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut content = Vec::new();
        let part_count = parts.len();
        for (i, (start, data)) in parts.into_iter().enumerate() {
            let range = ByteRange::new(start, data.len() as u64).ok_or(
                RemoteError::InvalidRange {
                    range: format!("bytes {}-", start),
                    reason: "empty part",
                },
            )?;
            if start != content.len() as u64 {
                return Err(RemoteError::InvalidRange {
                    range: range.to_string(),
                    reason: "parts are not contiguous",
                });
            }
            if i + 1 < part_count && range.len() != part_size {
                return Err(RemoteError::InvalidRange {
                    range: range.to_string(),
                    reason: "only the last part may be short",
                });
            }
            content.extend_from_slice(&data);
        }

        if content.len() as u64 != archive_size {
            return Err(RemoteError::SizeMismatch {
                expected: content.len() as u64,
                received: archive_size,
            });
        }

        let computed = data_tree_hash(&content).to_hex();
        if computed != checksum {
            return Err(RemoteError::ChecksumMismatch {
                expected: checksum.to_string(),
                computed,
            });
        }

        let archive_id = Uuid::new_v4().simple().to_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.prepare_cached(
            "INSERT INTO archive
             (id, vault, description, checksum, content)
             VALUES
             (?, ?, ?, ?, ?)",
        )?
        .execute(rs::params![archive_id, vault, description, checksum, content])?;
        tx.prepare_cached("DELETE FROM part WHERE upload_id = ?")?
            .execute(rs::params![upload_id])?;
        tx.prepare_cached("DELETE FROM upload WHERE id = ?")?
            .execute(rs::params![upload_id])?;
        tx.commit()?;

        Ok(ArchiveLocation {
            location: format!("/-/vaults/{}/archives/{}", vault, archive_id),
            archive_id,
            checksum: checksum.to_string(),
        })
    }
}
