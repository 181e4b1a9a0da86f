//! Error types for the media key vault

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("Keystore already exists at {0}")]
    KeystoreExists(String),

    #[error("Keystore not found at {0}")]
    KeystoreNotFound(String),

    #[error("Invalid keystore JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Wrong secret or a tampered wrap record; the two are not distinguished.
    #[error("Authentication failed - wrong password or corrupted key material")]
    AuthFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Malformed recovery phrase: {0}")]
    RecoveryFormat(String),

    #[error("Recovery phrase does not match this vault")]
    RecoveryMismatch,

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Panic PIN is not set")]
    PinNotSet,
}

pub type Result<T> = std::result::Result<T, KeyVaultError>;

impl KeyVaultError {
    /// Errors caused by wrong or damaged secret material rather than I/O.
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::RecoveryMismatch | Self::Crypto(_)
        )
    }
}
