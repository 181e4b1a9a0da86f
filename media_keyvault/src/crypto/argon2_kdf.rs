//! Argon2id KDF deriving the KEK from the user secret

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::{Kek, KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// Salt length stored in the keystore
pub const SALT_LEN: usize = 16;

/// Argon2id configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Config {
    /// Iterations (time cost)
    pub time_cost: u32,
    /// Memory in KiB
    pub memory_cost_kib: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost_kib: 64 * 1024, // 64 MiB
            parallelism: 2,
        }
    }
}

impl Argon2Config {
    /// Preset for low-end devices
    pub fn low_memory() -> Self {
        Self {
            time_cost: 4,
            memory_cost_kib: 16 * 1024, // 16 MiB
            parallelism: 1,
        }
    }

    /// Preset for desktops
    pub fn high_security() -> Self {
        Self {
            time_cost: 4,
            memory_cost_kib: 256 * 1024, // 256 MiB
            parallelism: 4,
        }
    }

    /// Rough unlock latency estimate in milliseconds
    pub fn estimated_time_ms(&self) -> u64 {
        let base = 50u64;
        let mem_factor = (self.memory_cost_kib as u64 / 1024).max(1);
        let time_factor = self.time_cost as u64;
        base * time_factor * mem_factor / self.parallelism.max(1) as u64
    }

    fn params(&self) -> Result<Params> {
        Params::new(
            self.memory_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("Invalid Argon2 params: {}", e)))
    }
}

/// Derive the key-encryption key from a secret and the vault salt.
///
/// Deterministic for identical inputs. The secret bytes are used exactly as
/// given: no trimming, case folding or Unicode normalisation.
pub fn derive_kek(secret: &SecretString, salt: &[u8], config: &Argon2Config) -> Result<Kek> {
    const PEPPER: &[u8] = b"MEDIA_VAULT_v1_PEPPER";

    let argon2 = Argon2::new_with_secret(
        PEPPER,
        Algorithm::Argon2id,
        Version::V0x13,
        config.params()?,
    )
    .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("Argon2 init failed: {}", e)))?;

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret.expose_secret().as_bytes(), salt, &mut output[..])
        .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("Hashing failed: {}", e)))?;

    Ok(Kek::from_bytes(*output))
}

/// Generate a random vault salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt)
        .map_err(|e| KeyVaultError::Crypto(format!("RNG failed: {}", e)))?;
    Ok(salt)
}
