//! Media Vault - Password rotation
//!
//! Changing the password generates a new master key and rewraps every FEK
//! (and the catalog key) under it. File bodies are never touched.
//!
//! ```text
//! VerifyingOld -> DerivingNew -> RewrappingFiles(i/N)
//!     -> RewrappingDatabaseKey -> Committing -> Done
//!            (any step) -> Failed
//! ```
//!
//! The ledger is written before the first file changes and updated after
//! each one, and the keystore only switches once every item is on the new
//! key. A crash anywhere leaves each file readable by the old or the new
//! secret, and the ledger records which.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use media_keyvault::{MasterKey, MasterKeyStore};
use secrecy::SecretString;

use crate::database_key::DATABASE_KEY_FILE;
use crate::error::{VaultError, VaultResult};
use crate::file_manager::ExclusiveFiles;
use crate::ledger::{LedgerPhase, RotationLedger, WrapState, LEDGER_FILE};

/// Where a rotation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    VerifyingOld,
    DerivingNew,
    RewrappingFiles { done: usize, total: usize },
    RewrappingDatabaseKey,
    Committing,
    Done,
    Failed,
}

/// Outcome of a completed rotation
#[derive(Debug, Clone)]
pub struct RotationReport {
    /// Files whose header was actually rewritten
    pub files_rewrapped: usize,
    /// Files covered by the rotation
    pub files_total: usize,
    /// True if this finished an interrupted rotation
    pub resumed: bool,
    pub elapsed: Duration,
}

/// Snapshot of a persisted, unfinished rotation
#[derive(Debug, Clone)]
pub struct RotationStatus {
    pub phase: LedgerPhase,
    pub rotated: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
}

/// Runs password rotations against one vault.
///
/// Owns the vault-wide exclusive file lock for as long as it lives.
pub struct PasswordRotationService<'a> {
    keystore: &'a mut MasterKeyStore,
    files: ExclusiveFiles<'a>,
    ledger_path: PathBuf,
    database_key_path: PathBuf,
}

impl<'a> PasswordRotationService<'a> {
    pub fn new(root: &Path, keystore: &'a mut MasterKeyStore, files: ExclusiveFiles<'a>) -> Self {
        Self {
            keystore,
            files,
            ledger_path: root.join(LEDGER_FILE),
            database_key_path: root.join(DATABASE_KEY_FILE),
        }
    }

    /// Rotate from `old` to `new`. Returns the report and the new master key.
    ///
    /// `on_progress` may stop the run with `ControlFlow::Break` only while
    /// the old secret is being verified; later requests are refused.
    pub fn rotate<F>(
        &mut self,
        old: &SecretString,
        new: &SecretString,
        mut on_progress: F,
    ) -> VaultResult<(RotationReport, MasterKey)>
    where
        F: FnMut(RotationPhase) -> ControlFlow<()>,
    {
        let started = Instant::now();
        if let Some(ledger) = RotationLedger::load(&self.ledger_path)? {
            return Err(ledger.interrupted_error());
        }

        if on_progress(RotationPhase::VerifyingOld).is_break() {
            log::info!("Password change cancelled before any change");
            return Err(VaultError::RotationCancelled);
        }
        let old_master = self
            .keystore
            .unlock(old)
            .map_err(|e| failed(&mut on_progress, e.into()))?;

        emit(&mut on_progress, RotationPhase::DerivingNew);
        let (mut ledger, new_master) = self
            .prepare(&old_master, new)
            .map_err(|e| failed(&mut on_progress, e))?;

        let rewrapped = self
            .run(&mut ledger, &old_master, &new_master, &mut on_progress)
            .map_err(|e| failed(&mut on_progress, e))?;

        log::info!(
            "Password changed: {} of {} files rewrapped",
            rewrapped,
            ledger.files.len()
        );
        Ok((
            RotationReport {
                files_rewrapped: rewrapped,
                files_total: ledger.files.len(),
                resumed: false,
                elapsed: started.elapsed(),
            },
            new_master,
        ))
    }

    /// Finish an interrupted rotation. Needs both secrets.
    pub fn resume<F>(
        &mut self,
        old: &SecretString,
        new: &SecretString,
        mut on_progress: F,
    ) -> VaultResult<(RotationReport, MasterKey)>
    where
        F: FnMut(RotationPhase) -> ControlFlow<()>,
    {
        let started = Instant::now();
        let mut ledger = self.pending_ledger()?;

        if self.commit_landed(&ledger) {
            let new_master = self
                .keystore
                .unlock(new)
                .map_err(|e| failed(&mut on_progress, e.into()))?;
            RotationLedger::remove(&self.ledger_path)?;
            log::info!("Cleared ledger of an already committed password change");
            emit(&mut on_progress, RotationPhase::Done);
            return Ok((
                RotationReport {
                    files_rewrapped: 0,
                    files_total: ledger.files.len(),
                    resumed: true,
                    elapsed: started.elapsed(),
                },
                new_master,
            ));
        }

        emit(&mut on_progress, RotationPhase::VerifyingOld);
        let (old_master, new_master) = self
            .unlock_both(&ledger, old, new)
            .map_err(|e| failed(&mut on_progress, e))?;

        if ledger.phase == LedgerPhase::RollingBack {
            // A rollback renames before it records, so its `new` marks
            // cannot be trusted. Every item is checked again.
            ledger.restart_from_old();
            ledger.save(&self.ledger_path)?;
        }

        log::info!(
            "Resuming password change at {} of {}",
            ledger.rotated(),
            ledger.total()
        );
        let rewrapped = self
            .run(&mut ledger, &old_master, &new_master, &mut on_progress)
            .map_err(|e| failed(&mut on_progress, e))?;

        Ok((
            RotationReport {
                files_rewrapped: rewrapped,
                files_total: ledger.files.len(),
                resumed: true,
                elapsed: started.elapsed(),
            },
            new_master,
        ))
    }

    /// Roll an interrupted rotation back to the old secret.
    ///
    /// Returns `false` if the new key had already been committed; the
    /// ledger is cleared and the new secret stays in force.
    pub fn abort(&mut self, old: &SecretString, new: &SecretString) -> VaultResult<bool> {
        let mut ledger = self.pending_ledger()?;

        if self.commit_landed(&ledger) {
            RotationLedger::remove(&self.ledger_path)?;
            log::warn!("Password change already committed; nothing to roll back");
            return Ok(false);
        }

        let (old_master, new_master) = self.unlock_both(&ledger, old, new)?;

        ledger.phase = LedgerPhase::RollingBack;
        ledger.save(&self.ledger_path)?;

        for i in 0..ledger.files.len() {
            let path = self.files.files_dir().join(&ledger.files[i].name);
            if path.exists() {
                // An `old` entry may still have been renamed before the crash.
                self.files
                    .rewrap(&path, &new_master, &old_master)
                    .or_else(|e| already_on_target(e, ledger.files[i].state))?;
            }
            if ledger.files[i].state == WrapState::New {
                ledger.files[i].state = WrapState::Old;
                ledger.save(&self.ledger_path)?;
            }
        }

        if self.database_key_path.exists() {
            self.files
                .rewrap(&self.database_key_path, &new_master, &old_master)
                .or_else(|e| already_on_target(e, ledger.database_key))?;
        }
        if ledger.database_key == WrapState::New {
            ledger.database_key = WrapState::Old;
            ledger.save(&self.ledger_path)?;
        }

        RotationLedger::remove(&self.ledger_path)?;
        log::info!("Password change rolled back");
        Ok(true)
    }

    /// The persisted rotation, if one is unfinished
    pub fn status(&self) -> VaultResult<Option<RotationStatus>> {
        Ok(RotationLedger::load(&self.ledger_path)?.map(|ledger| RotationStatus {
            phase: ledger.phase,
            rotated: ledger.rotated(),
            total: ledger.total(),
            started_at: ledger.started_at,
        }))
    }

    fn pending_ledger(&self) -> VaultResult<RotationLedger> {
        RotationLedger::load(&self.ledger_path)?.ok_or(VaultError::NoRotationPending)
    }

    fn unlock_both(
        &self,
        ledger: &RotationLedger,
        old: &SecretString,
        new: &SecretString,
    ) -> VaultResult<(MasterKey, MasterKey)> {
        let old_master = self.keystore.unlock(old)?;
        let new_master = self.keystore.unwrap_master(&ledger.pending_master, new)?;
        Ok((old_master, new_master))
    }

    fn commit_landed(&self, ledger: &RotationLedger) -> bool {
        ledger.phase == LedgerPhase::Committing
            && self.keystore.wrapped_master() == &ledger.pending_master
    }

    /// Generate and wrap the new master key, then persist the ledger
    fn prepare(
        &self,
        old_master: &MasterKey,
        new: &SecretString,
    ) -> VaultResult<(RotationLedger, MasterKey)> {
        let new_master = MasterKey::generate();
        let pending_master = self.keystore.wrap_master(&new_master, new)?;
        let pending_recovery = self.keystore.recovery().rewrap(old_master, &new_master)?;

        let ledger = RotationLedger::new(pending_master, pending_recovery, &self.files.list_files()?);
        ledger.save(&self.ledger_path)?;
        log::info!("Rotation ledger written for {} items", ledger.total());
        Ok((ledger, new_master))
    }

    /// Move every remaining item to the new key and commit
    fn run<F>(
        &mut self,
        ledger: &mut RotationLedger,
        old_master: &MasterKey,
        new_master: &MasterKey,
        on_progress: &mut F,
    ) -> VaultResult<usize>
    where
        F: FnMut(RotationPhase) -> ControlFlow<()>,
    {
        let total = ledger.files.len();
        let mut rewrapped = 0;

        for i in 0..total {
            if ledger.files[i].state == WrapState::Old {
                let path = self.files.files_dir().join(&ledger.files[i].name);
                if path.exists() {
                    if self.files.rewrap(&path, old_master, new_master)? {
                        rewrapped += 1;
                    }
                } else {
                    log::warn!("{} vanished during password change", path.display());
                }
                ledger.files[i].state = WrapState::New;
                ledger.save(&self.ledger_path)?;
            }
            emit(on_progress, RotationPhase::RewrappingFiles { done: i + 1, total });
        }

        emit(on_progress, RotationPhase::RewrappingDatabaseKey);
        if ledger.database_key == WrapState::Old {
            if self.database_key_path.exists() {
                self.files
                    .rewrap(&self.database_key_path, old_master, new_master)?;
            }
            ledger.database_key = WrapState::New;
            ledger.save(&self.ledger_path)?;
        }

        emit(on_progress, RotationPhase::Committing);
        ledger.phase = LedgerPhase::Committing;
        ledger.save(&self.ledger_path)?;
        self.keystore
            .commit(ledger.pending_master.clone(), ledger.pending_recovery.clone())?;
        RotationLedger::remove(&self.ledger_path)?;

        emit(on_progress, RotationPhase::Done);
        Ok(rewrapped)
    }
}

/// Report progress. Cancellation is only honoured before anything changes.
fn emit<F>(on_progress: &mut F, phase: RotationPhase)
where
    F: FnMut(RotationPhase) -> ControlFlow<()>,
{
    if on_progress(phase).is_break() {
        log::warn!("Cancellation refused during {:?}; password change continues", phase);
    }
}

fn failed<F>(on_progress: &mut F, e: VaultError) -> VaultError
where
    F: FnMut(RotationPhase) -> ControlFlow<()>,
{
    emit(on_progress, RotationPhase::Failed);
    e
}

/// During rollback an item the ledger still lists as `old` may already be
/// back on the old key, in which case the new key cannot open it.
fn already_on_target(e: VaultError, recorded: WrapState) -> VaultResult<bool> {
    match (e, recorded) {
        (VaultError::Unwrap, WrapState::Old) => Ok(false),
        (other, _) => Err(other),
    }
}
