//! Panic PIN manager
//!
//! A secondary numeric PIN, unrelated to the master key. Entered at unlock it
//! can trigger a wipe; entered at a disguised entry point it reveals the
//! vault. Only a keyed verification hash is persisted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::{generate_salt, hash_for_verification, verify_pin_hash, VerificationHash, SALT_LEN};
use crate::error::{KeyVaultError, Result};
use crate::keystore::write_json_atomic;

/// What a PIN entry should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicAction {
    /// Not the panic PIN, or no feature enabled
    None,
    /// Destroy the vault
    Wipe,
    /// Open the vault from the disguised entry point
    RevealVault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PanicConfig {
    #[serde(with = "hex")]
    pin_salt: [u8; SALT_LEN],
    pin_hash: Option<VerificationHash>,
    wipe_enabled: bool,
    disguised_entry_enabled: bool,
}

/// Persistent panic PIN settings (`panic.json`)
#[derive(Debug)]
pub struct PanicKeyManager {
    path: PathBuf,
    config: PanicConfig,
}

impl PanicKeyManager {
    /// Load settings, creating an empty config with a fresh PIN salt if absent
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let config = serde_json::from_str(&json)?;
            return Ok(Self { path, config });
        }

        let manager = Self {
            path,
            config: PanicConfig {
                pin_salt: generate_salt()?,
                pin_hash: None,
                wipe_enabled: false,
                disguised_entry_enabled: false,
            },
        };
        manager.save()?;
        Ok(manager)
    }

    /// Set or replace the PIN
    pub fn set_pin(&mut self, pin: &str) -> Result<()> {
        let hash = hash_for_verification(pin, &self.config.pin_salt)?;
        self.update(|c| c.pin_hash = Some(hash))?;
        info!("panic PIN set");
        Ok(())
    }

    /// Remove the PIN and disable both features in one write
    pub fn clear_pin(&mut self) -> Result<()> {
        self.update(|c| {
            c.pin_hash = None;
            c.wipe_enabled = false;
            c.disguised_entry_enabled = false;
        })?;
        info!("panic PIN cleared");
        Ok(())
    }

    /// Match / no-match. False when no PIN is set.
    pub fn verify_pin(&self, pin: &str) -> bool {
        match &self.config.pin_hash {
            Some(hash) => verify_pin_hash(pin, &self.config.pin_salt, hash),
            None => false,
        }
    }

    pub fn enable_wipe(&mut self, enabled: bool) -> Result<()> {
        self.require_pin(enabled)?;
        self.update(|c| c.wipe_enabled = enabled)
    }

    pub fn enable_disguised_entry(&mut self, enabled: bool) -> Result<()> {
        self.require_pin(enabled)?;
        self.update(|c| c.disguised_entry_enabled = enabled)
    }

    pub fn is_pin_set(&self) -> bool {
        self.config.pin_hash.is_some()
    }

    pub fn wipe_enabled(&self) -> bool {
        self.config.wipe_enabled
    }

    pub fn disguised_entry_enabled(&self) -> bool {
        self.config.disguised_entry_enabled
    }

    /// Classify an entered PIN. Wipe wins when both features are on.
    pub fn check(&self, pin: &str) -> PanicAction {
        if !self.verify_pin(pin) {
            return PanicAction::None;
        }
        if self.config.wipe_enabled {
            warn!("panic PIN entered with wipe enabled");
            PanicAction::Wipe
        } else if self.config.disguised_entry_enabled {
            PanicAction::RevealVault
        } else {
            PanicAction::None
        }
    }

    fn require_pin(&self, enabling: bool) -> Result<()> {
        if enabling && !self.is_pin_set() {
            return Err(KeyVaultError::PinNotSet);
        }
        Ok(())
    }

    fn update(&mut self, change: impl FnOnce(&mut PanicConfig)) -> Result<()> {
        let mut next = self.config.clone();
        change(&mut next);
        write_json_atomic(&self.path, &next)?;
        self.config = next;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_enable_requires_pin() {
        let dir = tempdir().unwrap();
        let mut panic = PanicKeyManager::open_or_create(dir.path().join("panic.json")).unwrap();

        assert!(matches!(panic.enable_wipe(true), Err(KeyVaultError::PinNotSet)));
        assert!(matches!(
            panic.enable_disguised_entry(true),
            Err(KeyVaultError::PinNotSet)
        ));
        // Disabling is always allowed
        assert!(panic.enable_wipe(false).is_ok());
    }

    #[test]
    fn test_set_and_verify() {
        let dir = tempdir().unwrap();
        let mut panic = PanicKeyManager::open_or_create(dir.path().join("panic.json")).unwrap();

        assert!(!panic.verify_pin("1234"));
        panic.set_pin("1234").unwrap();
        assert!(panic.verify_pin("1234"));
        assert!(!panic.verify_pin("4321"));
    }

    #[test]
    fn test_invalid_pin_rejected() {
        let dir = tempdir().unwrap();
        let mut panic = PanicKeyManager::open_or_create(dir.path().join("panic.json")).unwrap();

        assert!(matches!(panic.set_pin("12"), Err(KeyVaultError::InvalidPin(_))));
        assert!(matches!(panic.set_pin("12ab"), Err(KeyVaultError::InvalidPin(_))));
        assert!(!panic.is_pin_set());
    }

    #[test]
    fn test_clear_disables_features() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panic.json");
        let mut panic = PanicKeyManager::open_or_create(&path).unwrap();
        panic.set_pin("9999").unwrap();
        panic.enable_wipe(true).unwrap();
        panic.enable_disguised_entry(true).unwrap();

        panic.clear_pin().unwrap();

        let reloaded = PanicKeyManager::open_or_create(&path).unwrap();
        assert!(!reloaded.is_pin_set());
        assert!(!reloaded.wipe_enabled());
        assert!(!reloaded.disguised_entry_enabled());
    }

    #[test]
    fn test_check_actions() {
        let dir = tempdir().unwrap();
        let mut panic = PanicKeyManager::open_or_create(dir.path().join("panic.json")).unwrap();
        panic.set_pin("2468").unwrap();

        assert_eq!(panic.check("2468"), PanicAction::None);

        panic.enable_disguised_entry(true).unwrap();
        assert_eq!(panic.check("2468"), PanicAction::RevealVault);
        assert_eq!(panic.check("1357"), PanicAction::None);

        panic.enable_wipe(true).unwrap();
        assert_eq!(panic.check("2468"), PanicAction::Wipe);
    }

    #[test]
    fn test_pin_not_persisted_in_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panic.json");
        let mut panic = PanicKeyManager::open_or_create(&path).unwrap();
        panic.set_pin("73519").unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(!json.contains("73519"));

        let reloaded = PanicKeyManager::open_or_create(&path).unwrap();
        assert!(reloaded.verify_pin("73519"));
    }
}
