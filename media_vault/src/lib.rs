//! # Media Vault
//!
//! Envelope-encrypted media storage with crash-safe password rotation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      MEDIA VAULT                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  SESSIONS   │  │ FILE MANAGER│  │  PASSWORD       │  │
//! │  │  lock/unlock│  │ MVLT envelop│  │  ROTATION       │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬────────┘  │
//! │         │                │                   │           │
//! │  ┌──────┴────────────────┴───────────────────┴────────┐ │
//! │  │              MEDIA_KEYVAULT INTEGRATION             │ │
//! │  │   Argon2id KEK → MasterKey → per-file FEK (GCM)     │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! │                                                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  RECOVERY   │  │  PANIC PIN  │  │  SECURE FS      │  │
//! │  │  24 words   │  │  wipe/reveal│  │  atomic + wipe  │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Every file has its own random FEK, wrapped by the master key
//! - Bodies are AES-256-GCM in 64 KiB chunks, bound to their position
//! - Changing the password rewraps headers only, never bodies
//! - Plaintext never lands inside the vault directory
//! - Keys are zeroized on drop and on lock

pub mod config;
pub mod database_key;
pub mod envelope;
pub mod error;
pub mod file_manager;
pub mod ledger;
pub mod locks;
pub mod rotation;
pub mod secure_fs;
pub mod session;
pub mod stream;
pub mod vault;

pub use config::VaultConfig;
pub use database_key::DatabaseKey;
pub use envelope::{FileHeader, FileMetadata};
pub use error::{VaultError, VaultResult};
pub use file_manager::{DecryptedStream, ImportedFile, VaultFileManager};
pub use rotation::{RotationPhase, RotationReport, RotationStatus};
pub use session::Session;
pub use vault::{KeySide, PartialUnlock, UnlockOutcome, Vault};

pub use media_keyvault::{Argon2Config, RecoveryArtifact};

/// Media Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
