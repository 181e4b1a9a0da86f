//! Media Vault - File locking
//!
//! Two layers: a per-path lock so that encrypt, delete and header reads on
//! the same file never interleave, and a vault-wide gate that per-file work
//! holds shared and password rotation holds exclusively.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-path mutual exclusion
#[derive(Default)]
pub struct PathLocks {
    busy: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Held while one path is in use; releases on drop
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free, then claim it
    pub fn lock(&self, path: &Path) -> PathGuard<'_> {
        let mut busy = self.busy.lock();
        while busy.contains(path) {
            self.released.wait(&mut busy);
        }
        busy.insert(path.to_path_buf());

        PathGuard {
            locks: self,
            path: path.to_path_buf(),
        }
    }

    /// Number of paths currently held
    pub fn held(&self) -> usize {
        self.busy.lock().len()
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.locks.busy.lock().remove(&self.path);
        self.locks.released.notify_all();
    }
}

/// Vault-wide reader/writer gate
#[derive(Default)]
pub struct RotationGate {
    inner: RwLock<()>,
}

impl RotationGate {
    /// Shared access for single-file operations.
    ///
    /// Recursive, so a caller already holding it can nest file operations.
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read_recursive()
    }

    /// Exclusive access for rotation
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write()
    }
}
