//! Media Vault - File envelope header
//!
//! Format pliku .vault:
//! ```text
//! [MAGIC 4B]["MVLT"]
//! [VERSION 1B][0x01]
//! [IV 12B][random, fresh on every (re)wrap]
//! [ENC_FEK 48B][AES-256-GCM(master, IV, FEK, AAD = MAGIC||VERSION)]
//! [META_LEN 4B][big-endian i32]
//! [META][nonce 12B || AES-256-GCM(FEK, json, AAD = "meta")]
//! [BODY][see stream.rs]
//! ```
//!
//! The header never holds the body key in the clear and never depends on
//! the body, so a password change rewrites only this part.

use std::io::{self, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use chrono::{DateTime, Utc};
use media_keyvault::{FileKey, MasterKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes identifying a vault envelope
pub const MAGIC: &[u8; 4] = b"MVLT";

/// Current format version
pub const VERSION: u8 = 0x01;

/// AES-GCM nonce size (96 bits)
pub const IV_LEN: usize = 12;

/// GCM authentication tag size
pub const TAG_LEN: usize = 16;

/// Wrapped FEK: 32-byte key + tag
pub const ENC_FEK_LEN: usize = 32 + TAG_LEN;

/// Upper bound on the encrypted metadata block
pub const MAX_META_LEN: usize = 64 * 1024;

/// Bytes before META: MAGIC + VERSION + IV + ENC_FEK + META_LEN
pub const FIXED_HEADER_LEN: usize = 4 + 1 + IV_LEN + ENC_FEK_LEN + 4;

const META_AAD: &[u8] = b"meta";

/// AAD binding the wrapped FEK to this format
fn fek_aad() -> [u8; 5] {
    [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], VERSION]
}

fn cipher(key: &[u8; 32]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// File metadata, stored encrypted under the file's own key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Original filename
    pub filename: String,
    /// MIME type
    pub mime_type: String,
    /// Import timestamp
    pub created_at: DateTime<Utc>,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// FileHeader
// ---------------------------------------------------------------------------

/// Parsed envelope header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub iv: [u8; IV_LEN],
    pub enc_fek: [u8; ENC_FEK_LEN],
    pub meta: Vec<u8>,
}

impl FileHeader {
    /// Build a header for a new file: fresh IV, FEK wrapped under `master`,
    /// metadata sealed under `fek`.
    pub fn seal(master: &MasterKey, fek: &FileKey, metadata: &FileMetadata) -> VaultResult<Self> {
        let json = Zeroizing::new(serde_json::to_vec(metadata)?);

        let mut nonce = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher(fek.expose())
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: json.as_slice(),
                    aad: META_AAD,
                },
            )
            .map_err(|e| VaultError::Crypto(format!("metadata seal failed: {}", e)))?;

        let mut meta = Vec::with_capacity(IV_LEN + sealed.len());
        meta.extend_from_slice(&nonce);
        meta.extend_from_slice(&sealed);
        if meta.len() > MAX_META_LEN {
            return Err(VaultError::Format(format!(
                "metadata too large: {} bytes",
                meta.len()
            )));
        }

        let iv = random_iv();
        Ok(Self {
            iv,
            enc_fek: wrap_fek(master, fek, &iv)?,
            meta,
        })
    }

    /// Unwrap the file key. Every failure is `Unwrap`.
    pub fn unwrap_fek(&self, master: &MasterKey) -> VaultResult<FileKey> {
        let aad = fek_aad();
        let plain = Zeroizing::new(
            cipher(master.expose())
                .decrypt(
                    Nonce::from_slice(&self.iv),
                    Payload {
                        msg: &self.enc_fek[..],
                        aad: &aad,
                    },
                )
                .map_err(|_| VaultError::Unwrap)?,
        );
        FileKey::from_slice(&plain).ok_or(VaultError::Unwrap)
    }

    /// Decrypt the metadata block
    pub fn open_metadata(&self, fek: &FileKey) -> VaultResult<FileMetadata> {
        if self.meta.len() < IV_LEN + TAG_LEN {
            return Err(VaultError::Unwrap);
        }
        let (nonce, sealed) = self.meta.split_at(IV_LEN);
        let json = Zeroizing::new(
            cipher(fek.expose())
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: sealed,
                        aad: META_AAD,
                    },
                )
                .map_err(|_| VaultError::Unwrap)?,
        );
        serde_json::from_slice(&json)
            .map_err(|e| VaultError::Format(format!("metadata is not valid JSON: {}", e)))
    }

    /// Same FEK and META, wrapped under `new` with a fresh IV
    pub fn rewrapped(&self, old: &MasterKey, new: &MasterKey) -> VaultResult<Self> {
        let fek = self.unwrap_fek(old)?;
        let iv = random_iv();
        Ok(Self {
            iv,
            enc_fek: wrap_fek(new, &fek, &iv)?,
            meta: self.meta.clone(),
        })
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_LEN + self.meta.len()
    }

    /// Serialize the header
    pub fn write_to<W: Write>(&self, writer: &mut W) -> VaultResult<()> {
        let meta_len = i32::try_from(self.meta.len())
            .map_err(|_| VaultError::Format("metadata length overflow".into()))?;

        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.enc_fek);
        out.extend_from_slice(&meta_len.to_be_bytes());
        out.extend_from_slice(&self.meta);

        writer.write_all(&out)?;
        Ok(())
    }

    /// Parse a header and leave `reader` at the first body byte.
    ///
    /// MAGIC is checked before VERSION and both before anything else is
    /// read. No decryption happens here.
    pub fn read_from<R: Read>(reader: &mut R) -> VaultResult<Self> {
        let mut magic = [0u8; 4];
        read_field(reader, &mut magic, "magic")?;
        if &magic != MAGIC {
            return Err(VaultError::Format("bad magic".into()));
        }

        let mut version = [0u8; 1];
        read_field(reader, &mut version, "version")?;
        if version[0] != VERSION {
            return Err(VaultError::Format(format!(
                "unsupported version {:#04x}",
                version[0]
            )));
        }

        let mut iv = [0u8; IV_LEN];
        read_field(reader, &mut iv, "iv")?;

        let mut enc_fek = [0u8; ENC_FEK_LEN];
        read_field(reader, &mut enc_fek, "wrapped key")?;

        let mut len_bytes = [0u8; 4];
        read_field(reader, &mut len_bytes, "metadata length")?;
        let meta_len = i32::from_be_bytes(len_bytes);
        if meta_len < 0 || meta_len as usize > MAX_META_LEN {
            return Err(VaultError::Format(format!(
                "metadata length {} out of range",
                meta_len
            )));
        }

        let mut meta = vec![0u8; meta_len as usize];
        read_field(reader, &mut meta, "metadata")?;

        Ok(Self { iv, enc_fek, meta })
    }
}

fn wrap_fek(master: &MasterKey, fek: &FileKey, iv: &[u8; IV_LEN]) -> VaultResult<[u8; ENC_FEK_LEN]> {
    let aad = fek_aad();
    let wrapped = cipher(master.expose())
        .encrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: &fek.expose()[..],
                aad: &aad,
            },
        )
        .map_err(|e| VaultError::Crypto(format!("key wrap failed: {}", e)))?;

    wrapped
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::Crypto("unexpected wrapped key length".into()))
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], field: &str) -> VaultResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            VaultError::Format(format!("truncated header ({})", field))
        } else {
            VaultError::from(e)
        }
    })
}
