//! Media Vault - Configuration (`vault.json`)

use std::path::Path;

use chrono::{DateTime, Utc};
use media_keyvault::{keystore::write_json_atomic, AeadCipher, Argon2Config};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::secure_fs::DEFAULT_WIPE_PASSES;

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault name
    pub name: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Version that created the vault
    pub version: String,
    /// Argon2id parameters for the password KEK
    pub kdf: Argon2Config,
    /// Cipher for keystore records
    pub keystore_cipher: AeadCipher,
    /// Overwrite passes used by secure delete
    pub wipe_passes: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "Media Vault".into(),
            created_at: Utc::now(),
            version: crate::VERSION.into(),
            kdf: Argon2Config::default(),
            keystore_cipher: AeadCipher::default(),
            wipe_passes: DEFAULT_WIPE_PASSES,
        }
    }
}

impl VaultConfig {
    /// Config for low-end devices
    pub fn low_memory() -> Self {
        Self {
            kdf: Argon2Config::low_memory(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> VaultResult<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| VaultError::Format(format!("vault config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> VaultResult<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }
}
