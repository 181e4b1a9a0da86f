//! Media Vault - Error Types

use std::io;

use media_keyvault::KeyVaultError;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // FORMAT / CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    /// Not one of our envelopes, or structurally broken. Raised before any key use.
    #[error("Invalid file format: {0}")]
    Format(String),

    /// Authentication failed somewhere in the envelope. Wrong key and
    /// tampering are deliberately indistinguishable.
    #[error("Cannot unwrap file - wrong key or corrupted data")]
    Unwrap,

    #[error("Authentication failed - wrong password")]
    Auth,

    #[error("Crypto error: {0}")]
    Crypto(String),

    // ═══════════════════════════════════════════════════════════════
    // SESSION / ROTATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Vault is locked")]
    Locked,

    #[error("Password change interrupted after {rotated} of {total} items")]
    RotationInterrupted { rotated: usize, total: usize },

    #[error("Password change cancelled")]
    RotationCancelled,

    #[error("No password change in progress")]
    NoRotationPending,

    // ═══════════════════════════════════════════════════════════════
    // RECOVERY / PANIC ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Recovery phrase is malformed: {0}")]
    RecoveryFormat(String),

    #[error("Recovery phrase does not belong to this vault")]
    RecoveryMismatch,

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Panic PIN not set")]
    PinNotSet,

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Storage error: {0}")]
    Storage(#[source] io::Error),

    #[error("Vault already exists at: {0}")]
    VaultExists(String),

    #[error("Vault not found at: {0}")]
    VaultNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VaultError {
    /// Text safe to show the user.
    ///
    /// Wrong password and corrupted data share one message.
    pub fn user_message(&self) -> String {
        match self {
            VaultError::Auth | VaultError::Unwrap => {
                "Incorrect password or corrupted data".to_string()
            }
            VaultError::RotationInterrupted { .. } => {
                "A password change was interrupted. Unlock with the old or the new password \
                 to finish it."
                    .to_string()
            }
            VaultError::Locked => "The vault is locked".to_string(),
            VaultError::RecoveryMismatch => {
                "This recovery phrase does not match the vault".to_string()
            }
            VaultError::Storage(_) => "Storage is unavailable, please try again".to_string(),
            other => other.to_string(),
        }
    }

    /// Only transient storage failures are worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Storage(_))
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::Unwrap | VaultError::Auth | VaultError::RecoveryMismatch
        )
    }
}

impl From<io::Error> for VaultError {
    fn from(e: io::Error) -> Self {
        // Errors raised inside a `Read` impl travel wrapped in io::Error.
        if e.get_ref().map_or(false, |inner| inner.is::<VaultError>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(vault_error) = inner.downcast::<VaultError>() {
                    return *vault_error;
                }
            }
            return VaultError::Storage(io::Error::new(io::ErrorKind::Other, "lost inner error"));
        }
        VaultError::Storage(e)
    }
}

impl From<VaultError> for io::Error {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Storage(inner) => inner,
            VaultError::Format(_) => io::Error::new(io::ErrorKind::InvalidData, e),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl From<KeyVaultError> for VaultError {
    fn from(e: KeyVaultError) -> Self {
        match e {
            KeyVaultError::AuthFailed => VaultError::Auth,
            KeyVaultError::Crypto(msg) | KeyVaultError::KeyDerivationFailed(msg) => {
                VaultError::Crypto(msg)
            }
            KeyVaultError::Io(io) => VaultError::from(io),
            KeyVaultError::InvalidJson(e) => VaultError::Serialization(e.to_string()),
            KeyVaultError::Base64(e) => VaultError::Serialization(e.to_string()),
            KeyVaultError::KeystoreExists(path) => VaultError::VaultExists(path),
            KeyVaultError::KeystoreNotFound(path) => VaultError::VaultNotFound(path),
            KeyVaultError::VersionMismatch { expected, got } => VaultError::Format(format!(
                "keystore version {} (expected {})",
                got, expected
            )),
            KeyVaultError::RecoveryFormat(msg) => VaultError::RecoveryFormat(msg),
            KeyVaultError::RecoveryMismatch => VaultError::RecoveryMismatch,
            KeyVaultError::InvalidPin(msg) => VaultError::InvalidPin(msg),
            KeyVaultError::PinNotSet => VaultError::PinNotSet,
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}

impl From<walkdir::Error> for VaultError {
    fn from(e: walkdir::Error) -> Self {
        match e.into_io_error() {
            Some(io) => VaultError::Storage(io),
            None => VaultError::Storage(io::Error::new(
                io::ErrorKind::Other,
                "filesystem loop while listing vault",
            )),
        }
    }
}
