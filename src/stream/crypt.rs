use std::io::{Read, Seek, SeekFrom};

use aes::Aes256;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::stream::{Engine, Transform, Transformer};

pub const BLOCK_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

// PBKDF2-HMAC-SHA256 rounds, salted with the IV
pub const KDF_ROUNDS: u32 = 1337;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Derive the AES-256 key for an archive from its passphrase and IV.
pub fn derive_key(passphrase: &[u8], iv: &[u8; IV_SIZE]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, iv, KDF_ROUNDS, key.as_mut());
    key
}

pub type Encryptor<R> = Transformer<R, CbcEngine>;

/// Wrap `reader` in AES-256-CBC with PKCS#7 padding under a fresh random IV.
pub fn encrypt<R: Read>(reader: R, passphrase: &[u8]) -> Result<Encryptor<R>, Error> {
    let mut iv = [0u8; IV_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    Ok(encrypt_with_iv(reader, passphrase, iv))
}

pub(crate) fn encrypt_with_iv<R: Read>(reader: R, passphrase: &[u8], iv: [u8; IV_SIZE]) -> Encryptor<R> {
    let key = derive_key(passphrase, &iv);
    let cipher = Aes256CbcEnc::new(GenericArray::from_slice(&key[..]), &iv.into());

    Transformer::new(
        reader,
        CbcEngine {
            cipher,
            iv,
            pending: Vec::with_capacity(BLOCK_SIZE),
        },
    )
}

pub struct CbcEngine {
    cipher: Aes256CbcEnc,
    iv: [u8; IV_SIZE],
    // Plaintext not yet making up a whole block
    pending: Vec<u8>,
}

impl CbcEngine {
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    fn encrypt_blocks(&mut self, blocks: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(blocks.len() % BLOCK_SIZE, 0);

        let start = out.len();
        out.extend_from_slice(blocks);
        for block in out[start..].chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

impl Engine for CbcEngine {
    fn update(&mut self, data: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
        let mut data = data;

        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() < BLOCK_SIZE {
                return Ok(());
            }
            let block = std::mem::take(&mut self.pending);
            self.encrypt_blocks(&block, out);
            self.pending = block;
            self.pending.clear();
        }

        let whole = data.len() - data.len() % BLOCK_SIZE;
        self.encrypt_blocks(&data[..whole], out);
        self.pending.extend_from_slice(&data[whole..]);
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> std::io::Result<()> {
        // PKCS#7, a block aligned stream gets a whole block of padding
        let pad = BLOCK_SIZE - self.pending.len();
        let mut block = std::mem::take(&mut self.pending);
        block.resize(BLOCK_SIZE, pad as u8);
        self.encrypt_blocks(&block, out);
        Ok(())
    }
}

impl<R: Read> Transform for Encryptor<R> {
    fn tag(&self) -> String {
        format!("aes:{}", hex::encode(self.engine().iv()))
    }
}

/// CBC chains every block on the one before it, there is no meaningful
/// position to seek to without replaying the whole stream.
impl<R: Read> Seek for Encryptor<R> {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            Error::UnsupportedOperation("seek"),
        ))
    }
}
