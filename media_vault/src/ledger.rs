//! Media Vault - Rotation ledger
//!
//! `rotation.ledger.json` exists only while a password change is in flight.
//! It carries the new wrapped master key, so a crash at any point leaves
//! every file readable by exactly one of the two secrets, and the ledger says
//! which.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use media_keyvault::{keystore::write_json_atomic, RecoveryRecord, WrappedKey};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// File name inside the vault root
pub const LEDGER_FILE: &str = "rotation.ledger.json";

/// Which master key currently wraps an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapState {
    Old,
    New,
}

/// Persisted rotation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerPhase {
    /// Items are being moved to the new key
    Rewrapping,
    /// All items are new; the keystore swap may or may not have landed
    Committing,
    /// Items are being moved back to the old key
    RollingBack,
}

/// One rewrappable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// File name relative to its directory
    pub name: String,
    pub state: WrapState,
}

/// Crash-safe record of a password change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationLedger {
    pub started_at: DateTime<Utc>,
    pub phase: LedgerPhase,
    /// New master key wrapped under KEK(new secret, salt)
    pub pending_master: WrappedKey,
    /// Recovery record re-pointed at the new master key
    pub pending_recovery: RecoveryRecord,
    pub files: Vec<LedgerEntry>,
    pub database_key: WrapState,
}

impl RotationLedger {
    pub fn new(
        pending_master: WrappedKey,
        pending_recovery: RecoveryRecord,
        files: &[PathBuf],
    ) -> Self {
        let files = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| LedgerEntry {
                name: n.to_string_lossy().into_owned(),
                state: WrapState::Old,
            })
            .collect();

        Self {
            started_at: Utc::now(),
            phase: LedgerPhase::Rewrapping,
            pending_master,
            pending_recovery,
            files,
            database_key: WrapState::Old,
        }
    }

    /// Load the ledger if one exists
    pub fn load(path: &Path) -> VaultResult<Option<Self>> {
        match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| VaultError::Format(format!("rotation ledger: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> VaultResult<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    pub fn remove(path: &Path) -> VaultResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Items (files plus the database key)
    pub fn total(&self) -> usize {
        self.files.len() + 1
    }

    /// Items already on the new key
    pub fn rotated(&self) -> usize {
        let files = self.files.iter().filter(|e| e.state == WrapState::New).count();
        files + usize::from(self.database_key == WrapState::New)
    }

    /// Go back to rewrapping with every item marked `old`
    pub fn restart_from_old(&mut self) {
        self.phase = LedgerPhase::Rewrapping;
        for entry in &mut self.files {
            entry.state = WrapState::Old;
        }
        self.database_key = WrapState::Old;
    }

    pub fn interrupted_error(&self) -> VaultError {
        VaultError::RotationInterrupted {
            rotated: self.rotated(),
            total: self.total(),
        }
    }
}
