//! Master key store
//!
//! `keystore.json` holds everything needed to get from the user secret to the
//! master key, and nothing that is secret on its own:
//!
//! ```text
//! salt            cleartext, 16 bytes, fixed for the life of the vault
//! kdf             Argon2id parameters
//! wrapped_master  AEAD(KEK = Argon2id(secret, salt), MasterKey)
//! recovery        RecoveryRecord (phrase wrap + escrow)
//! ```
//!
//! Every save is write-temp, fsync, rename, so a reader sees either the old
//! or the new store and never a torn one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::{
    derive_kek, generate_salt, unwrap_key, wrap_key, AeadCipher, Argon2Config, MasterKey,
    WrappedKey, SALT_LEN,
};
use crate::error::{KeyVaultError, Result};
use crate::recovery::{RecoveryArtifact, RecoveryRecord};

/// On-disk format version
pub const KEYSTORE_VERSION: u32 = 1;

const MASTER_AAD: &[u8] = b"media-vault:keystore:master";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeystoreFile {
    version: u32,
    #[serde(with = "hex")]
    salt: [u8; SALT_LEN],
    kdf: Argon2Config,
    wrapped_master: WrappedKey,
    recovery: RecoveryRecord,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Persistent wrapper around the master key
#[derive(Debug)]
pub struct MasterKeyStore {
    path: PathBuf,
    file: KeystoreFile,
}

impl MasterKeyStore {
    /// Create a new keystore with a fresh salt and a fresh random master key.
    ///
    /// Returns the store, the master key for the first session and the
    /// recovery phrase to show the user.
    pub fn create<P: AsRef<Path>>(
        path: P,
        secret: &SecretString,
        kdf: Argon2Config,
        cipher: AeadCipher,
    ) -> Result<(Self, MasterKey, RecoveryArtifact)> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(KeyVaultError::KeystoreExists(path.display().to_string()));
        }

        let salt = generate_salt()?;
        let master = MasterKey::generate();
        let kek = derive_kek(secret, &salt, &kdf)?;
        let wrapped_master = wrap_key(master.expose(), kek.expose(), cipher, MASTER_AAD)?;
        let (artifact, recovery) = RecoveryRecord::create(&master, cipher)?;

        let now = Utc::now();
        let store = Self {
            path,
            file: KeystoreFile {
                version: KEYSTORE_VERSION,
                salt,
                kdf,
                wrapped_master,
                recovery,
                created_at: now,
                updated_at: now,
            },
        };
        store.save()?;

        info!(path = %store.path.display(), "keystore created");
        Ok((store, master, artifact))
    }

    /// Load an existing keystore
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(KeyVaultError::KeystoreNotFound(path.display().to_string()));
        }

        let json = fs::read_to_string(&path)?;
        let file: KeystoreFile = serde_json::from_str(&json)?;
        if file.version != KEYSTORE_VERSION {
            return Err(KeyVaultError::VersionMismatch {
                expected: KEYSTORE_VERSION,
                got: file.version,
            });
        }

        Ok(Self { path, file })
    }

    /// Derive the KEK and unwrap the master key.
    ///
    /// A wrong secret and a damaged store both yield `AuthFailed`.
    pub fn unlock(&self, secret: &SecretString) -> Result<MasterKey> {
        let master = self.unwrap_master(&self.file.wrapped_master, secret)?;
        debug!("master key unwrapped");
        Ok(master)
    }

    /// Wrap `master` under KEK(secret, salt) without touching the store
    pub fn wrap_master(&self, master: &MasterKey, secret: &SecretString) -> Result<WrappedKey> {
        let kek = derive_kek(secret, &self.file.salt, &self.file.kdf)?;
        wrap_key(master.expose(), kek.expose(), self.cipher(), MASTER_AAD)
    }

    /// Unwrap a wrapped master key produced by [`wrap_master`](Self::wrap_master)
    pub fn unwrap_master(&self, wrapped: &WrappedKey, secret: &SecretString) -> Result<MasterKey> {
        let kek = derive_kek(secret, &self.file.salt, &self.file.kdf)?;
        let bytes = unwrap_key(wrapped, kek.expose(), MASTER_AAD)?;
        Ok(MasterKey::from_bytes(*bytes))
    }

    /// Atomically install a new wrapped master key and its recovery record
    pub fn commit(&mut self, wrapped_master: WrappedKey, recovery: RecoveryRecord) -> Result<()> {
        let previous = self.file.clone();
        self.file.wrapped_master = wrapped_master;
        self.file.recovery = recovery;
        self.file.updated_at = Utc::now();

        if let Err(e) = self.save() {
            self.file = previous;
            return Err(e);
        }
        info!("keystore committed");
        Ok(())
    }

    /// Re-initialise around a known master key: fresh salt, new secret.
    ///
    /// Used by recovery. The recovery record is kept, so the same phrase
    /// keeps working afterwards.
    pub fn reinitialize(&mut self, master: &MasterKey, new_secret: &SecretString) -> Result<()> {
        let previous = self.file.clone();
        self.file.salt = generate_salt()?;
        self.file.wrapped_master = self.wrap_master(master, new_secret)?;
        self.file.updated_at = Utc::now();

        if let Err(e) = self.save() {
            self.file = previous;
            return Err(e);
        }
        info!("keystore re-initialised with fresh salt");
        Ok(())
    }

    /// Re-display the recovery phrase for an unlocked master key
    pub fn export_recovery(&self, master: &MasterKey) -> Result<RecoveryArtifact> {
        self.file.recovery.export(master)
    }

    /// Recover the master key from a phrase
    pub fn recover_master(&self, artifact: &RecoveryArtifact) -> Result<MasterKey> {
        self.file.recovery.recover(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.file.salt
    }

    pub fn kdf(&self) -> &Argon2Config {
        &self.file.kdf
    }

    pub fn cipher(&self) -> AeadCipher {
        self.file.wrapped_master.cipher
    }

    pub fn wrapped_master(&self) -> &WrappedKey {
        &self.file.wrapped_master
    }

    pub fn recovery(&self) -> &RecoveryRecord {
        &self.file.recovery
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.file.created_at
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.file)
    }
}

/// Serialize `value` to `path` via a synced sibling temp file and a rename
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    if let Some(parent) = path.parent() {
        // Directory fsync is not supported everywhere; the rename already happened.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
