//! Media Vault - Main Vault Implementation
//!
//! The facade tying the key store, panic PIN, file manager and rotation
//! together. On-disk layout:
//!
//! ```text
//! <root>/vault.json            configuration
//! <root>/keystore.json         salt + wrapped master key + recovery record
//! <root>/panic.json            panic PIN hash and switches
//! <root>/catalog.key           catalog database key (empty-body envelope)
//! <root>/files/*.vault         media envelopes
//! <root>/rotation.ledger.json  only while a password change is unfinished
//! ```

use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use media_keyvault::{KeyVaultError, MasterKeyStore, PanicAction, PanicKeyManager, RecoveryArtifact};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::database_key::{DatabaseKey, DATABASE_KEY_FILE};
use crate::envelope::{FileHeader, FileMetadata};
use crate::error::{VaultError, VaultResult};
use crate::file_manager::{list_envelopes, DecryptedStream, ImportedFile, VaultFileManager, VAULT_EXTENSION};
use crate::ledger::{RotationLedger, LEDGER_FILE};
use crate::rotation::{PasswordRotationService, RotationPhase, RotationReport, RotationStatus};
use crate::secure_fs;
use crate::session::{Session, SessionRegistry};

pub const CONFIG_FILE: &str = "vault.json";
pub const KEYSTORE_FILE: &str = "keystore.json";
pub const PANIC_FILE: &str = "panic.json";
pub const FILES_DIR: &str = "files";

/// Which secret opened a vault mid-rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySide {
    Old,
    New,
}

/// Session opened while a password change is unfinished
#[derive(Debug)]
pub struct PartialUnlock {
    pub session: Session,
    pub side: KeySide,
    /// Envelopes this session can open
    pub readable: Vec<PathBuf>,
    /// Envelopes that need the other secret
    pub unreadable: Vec<PathBuf>,
}

/// Result of an unlock attempt that may have been the panic PIN
#[derive(Debug)]
pub enum UnlockOutcome {
    Unlocked(Session),
    Wiped,
}

/// Media Vault - Main entry point
pub struct Vault {
    /// Vault root path
    root: PathBuf,
    /// Configuration
    config: VaultConfig,
    keystore: Mutex<MasterKeyStore>,
    panic: Mutex<PanicKeyManager>,
    files: VaultFileManager,
    sessions: SessionRegistry,
}

impl Vault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new vault. Returns it unlocked, with the recovery phrase.
    pub fn create<P: AsRef<Path>>(
        path: P,
        secret: &SecretString,
        config: VaultConfig,
    ) -> VaultResult<(Self, Session, RecoveryArtifact)> {
        let root = path.as_ref().to_path_buf();
        if root.join(KEYSTORE_FILE).exists() {
            return Err(VaultError::VaultExists(root.display().to_string()));
        }

        std::fs::create_dir_all(root.join(FILES_DIR))?;
        config.save(&root.join(CONFIG_FILE))?;

        let (keystore, master, artifact) = MasterKeyStore::create(
            root.join(KEYSTORE_FILE),
            secret,
            config.kdf.clone(),
            config.keystore_cipher,
        )?;
        DatabaseKey::create(&master, &root.join(DATABASE_KEY_FILE))?;
        let panic = PanicKeyManager::open_or_create(root.join(PANIC_FILE))?;

        let vault = Self::assemble(root, config, keystore, panic);
        let session = vault.sessions.open(master);
        log::info!("Vault created at {}", vault.root.display());
        Ok((vault, session, artifact))
    }

    /// Open an existing vault (locked)
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.join(KEYSTORE_FILE).exists() {
            return Err(VaultError::VaultNotFound(root.display().to_string()));
        }

        let config = VaultConfig::load(&root.join(CONFIG_FILE))?;
        let keystore = MasterKeyStore::open(root.join(KEYSTORE_FILE))?;
        let panic = PanicKeyManager::open_or_create(root.join(PANIC_FILE))?;
        Ok(Self::assemble(root, config, keystore, panic))
    }

    fn assemble(
        root: PathBuf,
        config: VaultConfig,
        keystore: MasterKeyStore,
        panic: PanicKeyManager,
    ) -> Self {
        let files = VaultFileManager::new(root.join(FILES_DIR), config.wipe_passes);
        Self {
            root,
            config,
            keystore: Mutex::new(keystore),
            panic: Mutex::new(panic),
            files,
            sessions: SessionRegistry::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNLOCK / LOCK
    // ═══════════════════════════════════════════════════════════════════════

    /// Unlock with the password.
    ///
    /// Refused with `RotationInterrupted` while a password change is
    /// unfinished; use [`unlock_interrupted`](Self::unlock_interrupted).
    pub fn unlock(&self, secret: &SecretString) -> VaultResult<Session> {
        self.ensure_no_rotation()?;
        let master = self.keystore.lock().unlock(secret)?;
        log::info!("Vault unlocked");
        Ok(self.sessions.open(master))
    }

    /// Unlock with a secret that might be the panic PIN
    pub fn unlock_or_panic(&self, secret: &SecretString) -> VaultResult<UnlockOutcome> {
        let action = self.panic.lock().check(secret.expose_secret());
        if action == PanicAction::Wipe {
            self.wipe()?;
            return Ok(UnlockOutcome::Wiped);
        }
        self.unlock(secret).map(UnlockOutcome::Unlocked)
    }

    /// Lock vault: zeroize the key of every session
    pub fn lock(&self) {
        let cleared = self.sessions.lock_all();
        log::info!("Vault locked ({} sessions cleared)", cleared);
    }

    /// Check if any session is unlocked
    pub fn is_unlocked(&self) -> bool {
        self.sessions.any_active()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PASSWORD ROTATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Change the password. Live sessions switch to the new master key.
    pub fn change_secret<F>(
        &self,
        old: &SecretString,
        new: &SecretString,
        on_progress: F,
    ) -> VaultResult<RotationReport>
    where
        F: FnMut(RotationPhase) -> ControlFlow<()>,
    {
        let mut keystore = self.keystore.lock();
        let mut service =
            PasswordRotationService::new(&self.root, &mut keystore, self.files.exclusive());
        let (report, master) = service.rotate(old, new, on_progress)?;
        // Swap while the exclusive lock is still held.
        self.sessions.replace_all(&master);
        drop(service);
        Ok(report)
    }

    /// Open whatever one secret can read while a rotation is unfinished
    pub fn unlock_interrupted(&self, secret: &SecretString) -> VaultResult<PartialUnlock> {
        let ledger = RotationLedger::load(&self.root.join(LEDGER_FILE))?
            .ok_or(VaultError::NoRotationPending)?;

        let keystore = self.keystore.lock();
        let committed = keystore.wrapped_master() == &ledger.pending_master;
        let (master, side) = match keystore.unlock(secret) {
            Ok(master) if committed => (master, KeySide::New),
            Ok(master) => (master, KeySide::Old),
            Err(KeyVaultError::AuthFailed) if !committed => {
                (keystore.unwrap_master(&ledger.pending_master, secret)?, KeySide::New)
            }
            Err(e) => return Err(e.into()),
        };
        drop(keystore);

        let mut readable = Vec::new();
        let mut unreadable = Vec::new();
        for path in self.files.list_files()? {
            if self.files.can_unwrap(&master, &path)? {
                readable.push(path);
            } else {
                unreadable.push(path);
            }
        }

        log::info!(
            "Partial unlock: {} readable, {} need the other password",
            readable.len(),
            unreadable.len()
        );
        Ok(PartialUnlock {
            session: self.sessions.open(master),
            side,
            readable,
            unreadable,
        })
    }

    /// Finish an interrupted password change
    pub fn resume_rotation<F>(
        &self,
        old: &SecretString,
        new: &SecretString,
        on_progress: F,
    ) -> VaultResult<RotationReport>
    where
        F: FnMut(RotationPhase) -> ControlFlow<()>,
    {
        let mut keystore = self.keystore.lock();
        let mut service =
            PasswordRotationService::new(&self.root, &mut keystore, self.files.exclusive());
        let (report, master) = service.resume(old, new, on_progress)?;
        self.sessions.replace_all(&master);
        drop(service);
        Ok(report)
    }

    /// Roll an interrupted password change back. Locks all sessions.
    pub fn abort_rotation(&self, old: &SecretString, new: &SecretString) -> VaultResult<bool> {
        let mut keystore = self.keystore.lock();
        let mut service =
            PasswordRotationService::new(&self.root, &mut keystore, self.files.exclusive());
        let rolled_back = service.abort(old, new)?;
        self.sessions.lock_all();
        drop(service);
        Ok(rolled_back)
    }

    pub fn rotation_status(&self) -> VaultResult<Option<RotationStatus>> {
        let mut keystore = self.keystore.lock();
        let status =
            PasswordRotationService::new(&self.root, &mut keystore, self.files.exclusive()).status();
        status
    }

    fn ensure_no_rotation(&self) -> VaultResult<()> {
        match RotationLedger::load(&self.root.join(LEDGER_FILE))? {
            Some(ledger) => Err(ledger.interrupted_error()),
            None => Ok(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECOVERY
    // ═══════════════════════════════════════════════════════════════════════

    /// Show the recovery phrase again
    pub fn export_recovery_artifact(&self, session: &Session) -> VaultResult<RecoveryArtifact> {
        let keystore = self.keystore.lock();
        let master = session.master_key()?;
        Ok(keystore.export_recovery(&master)?)
    }

    /// Regain access with the recovery phrase and set a new password.
    ///
    /// The keystore gets a fresh salt; no file is touched.
    pub fn recover(&self, new_secret: &SecretString, phrase: &str) -> VaultResult<Session> {
        let artifact = RecoveryArtifact::parse(phrase)?;
        self.ensure_no_rotation()?;

        let mut keystore = self.keystore.lock();
        let master = keystore.recover_master(&artifact)?;
        keystore.reinitialize(&master, new_secret)?;
        drop(keystore);

        self.sessions.lock_all();
        log::info!("Vault recovered with recovery phrase");
        Ok(self.sessions.open(master))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PANIC PIN
    // ═══════════════════════════════════════════════════════════════════════

    /// Changing panic settings needs an unlocked session.
    pub fn set_panic_pin(&self, session: &Session, pin: &str) -> VaultResult<()> {
        require_unlocked(session)?;
        Ok(self.panic.lock().set_pin(pin)?)
    }

    pub fn clear_panic_pin(&self, session: &Session) -> VaultResult<()> {
        require_unlocked(session)?;
        Ok(self.panic.lock().clear_pin()?)
    }

    pub fn verify_panic_pin(&self, pin: &str) -> bool {
        self.panic.lock().verify_pin(pin)
    }

    pub fn enable_panic_wipe(&self, session: &Session, enabled: bool) -> VaultResult<()> {
        require_unlocked(session)?;
        Ok(self.panic.lock().enable_wipe(enabled)?)
    }

    pub fn enable_disguised_entry(&self, session: &Session, enabled: bool) -> VaultResult<()> {
        require_unlocked(session)?;
        Ok(self.panic.lock().enable_disguised_entry(enabled)?)
    }

    /// True when `pin` is the panic PIN and disguised entry is on
    pub fn reveal_from_disguise(&self, pin: &str) -> bool {
        let panic = self.panic.lock();
        panic.disguised_entry_enabled() && panic.verify_pin(pin)
    }

    /// Destroy the vault: lock, then securely delete every file.
    pub fn wipe(&self) -> VaultResult<usize> {
        self.sessions.lock_all();
        let _exclusive = self.files.exclusive();
        let passes = self.config.wipe_passes;
        let mut deleted = 0;

        for path in list_envelopes(self.files.files_dir())? {
            deleted += usize::from(secure_fs::secure_delete(&path, passes)?);
        }
        for name in [
            DATABASE_KEY_FILE,
            LEDGER_FILE,
            KEYSTORE_FILE,
            PANIC_FILE,
            CONFIG_FILE,
        ] {
            deleted += usize::from(secure_fs::secure_delete(&self.root.join(name), passes)?);
        }
        let _ = std::fs::remove_dir(self.files.files_dir());
        let _ = std::fs::remove_dir(&self.root);

        log::warn!("Vault wiped ({} files destroyed)", deleted);
        Ok(deleted)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FILE OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Catalog database key
    pub fn database_key(&self, session: &Session) -> VaultResult<DatabaseKey> {
        let _shared = self.files.shared();
        let master = session.master_key()?;
        DatabaseKey::load(&master, &self.root.join(DATABASE_KEY_FILE))
    }

    /// Encrypt a stream into a new envelope inside the vault
    pub fn encrypt<R: Read>(
        &self,
        session: &Session,
        source: R,
        filename: &str,
        mime_type: &str,
    ) -> VaultResult<(PathBuf, FileHeader)> {
        let _shared = self.files.shared();
        self.ensure_no_rotation()?;
        let master = session.master_key()?;
        let destination = self
            .files
            .files_dir()
            .join(format!("{}.{}", Uuid::new_v4(), VAULT_EXTENSION));
        let header = self
            .files
            .encrypt(&master, source, &destination, filename, mime_type)?;
        Ok((destination, header))
    }

    /// Import a file from disk; the plaintext source is securely deleted
    pub fn import_file(
        &self,
        session: &Session,
        source: &Path,
        mime_type: Option<&str>,
    ) -> VaultResult<ImportedFile> {
        let _shared = self.files.shared();
        self.ensure_no_rotation()?;
        let master = session.master_key()?;
        self.files.import_file(&master, source, mime_type)
    }

    pub fn decrypt_to_stream(&self, session: &Session, path: &Path) -> VaultResult<DecryptedStream> {
        let _shared = self.files.shared();
        let master = session.master_key()?;
        self.files.decrypt_to_stream(&master, path)
    }

    pub fn decrypt_to_temporary_file(
        &self,
        session: &Session,
        path: &Path,
        dir: &Path,
    ) -> VaultResult<PathBuf> {
        let _shared = self.files.shared();
        let master = session.master_key()?;
        self.files.decrypt_to_temporary_file(&master, path, dir)
    }

    pub fn peek_metadata(&self, session: &Session, path: &Path) -> VaultResult<FileMetadata> {
        let _shared = self.files.shared();
        let master = session.master_key()?;
        self.files.peek_metadata(&master, path)
    }

    /// Securely delete an envelope; `false` if it was already gone
    pub fn delete_file(&self, path: &Path) -> VaultResult<bool> {
        self.files.secure_delete(path)
    }

    pub fn list_files(&self) -> VaultResult<Vec<PathBuf>> {
        self.files.list_files()
    }
}

fn require_unlocked(session: &Session) -> VaultResult<()> {
    session.master_key().map(drop)
}
