//! Media Vault - Unlocked session
//!
//! The master key lives in a slot shared between the session and the vault.
//! `Vault::lock()` empties every slot, so a session outliving a lock just
//! starts returning `Locked`.

use std::sync::{Arc, Weak};

use media_keyvault::MasterKey;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::error::{VaultError, VaultResult};

/// Shared holder of one session's master key
pub(crate) type KeySlot = RwLock<Option<MasterKey>>;

/// An unlocked view of the vault
pub struct Session {
    slot: Arc<KeySlot>,
}

impl Session {
    /// Borrow the master key, or `Locked` once the vault was locked
    pub fn master_key(&self) -> VaultResult<MappedRwLockReadGuard<'_, MasterKey>> {
        RwLockReadGuard::try_map(self.slot.read(), |slot| slot.as_ref())
            .map_err(|_| VaultError::Locked)
    }

    pub fn is_active(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Drop the key now instead of at end of scope
    pub fn close(&self) {
        self.slot.write().take();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.slot.write().take();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Every session the vault has handed out
#[derive(Default)]
pub(crate) struct SessionRegistry {
    slots: Mutex<Vec<Weak<KeySlot>>>,
}

impl SessionRegistry {
    pub fn open(&self, master: MasterKey) -> Session {
        let slot = Arc::new(RwLock::new(Some(master)));
        let mut slots = self.slots.lock();
        slots.retain(|s| s.strong_count() > 0);
        slots.push(Arc::downgrade(&slot));
        Session { slot }
    }

    /// Zeroize the key of every live session
    pub fn lock_all(&self) -> usize {
        let mut slots = self.slots.lock();
        let mut cleared = 0;
        for slot in slots.drain(..).filter_map(|s| s.upgrade()) {
            if slot.write().take().is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    /// Swap in a new master key for every live session
    pub fn replace_all(&self, master: &MasterKey) {
        let slots = self.slots.lock();
        for slot in slots.iter().filter_map(|s| s.upgrade()) {
            let mut guard = slot.write();
            if guard.is_some() {
                *guard = Some(master.duplicate());
            }
        }
    }

    pub fn any_active(&self) -> bool {
        self.slots
            .lock()
            .iter()
            .filter_map(|s| s.upgrade())
            .any(|slot| slot.read().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_all_clears_sessions() {
        let registry = SessionRegistry::default();
        let a = registry.open(MasterKey::generate());
        let b = registry.open(MasterKey::generate());
        assert!(registry.any_active());

        assert_eq!(registry.lock_all(), 2);
        assert!(matches!(a.master_key(), Err(VaultError::Locked)));
        assert!(matches!(b.master_key(), Err(VaultError::Locked)));
        assert!(!registry.any_active());
    }

    #[test]
    fn test_drop_clears_slot() {
        let registry = SessionRegistry::default();
        let session = registry.open(MasterKey::generate());
        assert!(registry.any_active());
        drop(session);
        assert!(!registry.any_active());
    }

    #[test]
    fn test_replace_all() {
        let registry = SessionRegistry::default();
        let session = registry.open(MasterKey::generate());
        let next = MasterKey::generate();
        registry.replace_all(&next);
        assert_eq!(session.master_key().unwrap().expose(), next.expose());
    }
}
