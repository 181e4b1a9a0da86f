//! # MEDIA_KEYVAULT - key lifecycle for the media vault
//!
//! ## Contents:
//! - Argon2id KEK derivation from the user secret
//! - Master key store (`keystore.json`) with atomic saves
//! - 24-word recovery phrase that survives password changes
//! - Panic PIN verification hashes (wipe / disguised entry)
//!
//! Nothing in this crate touches media files; `media_vault` builds the file
//! envelopes on top of the master key handed out here.

pub mod crypto;
pub mod error;
pub mod keystore;
pub mod panic;
pub mod recovery;

// Re-exports
pub use crypto::{AeadCipher, Argon2Config, FileKey, MasterKey, WrappedKey};
pub use error::{KeyVaultError, Result};
pub use keystore::MasterKeyStore;
pub use panic::{PanicAction, PanicKeyManager};
pub use recovery::{RecoveryArtifact, RecoveryRecord};

/// Library version
pub const VERSION: &str = "1.0.0";
