//! Media Vault - Catalog database key
//!
//! The catalog key is stored as an ordinary envelope (`catalog.key`) whose
//! FEK is the database key and whose body is empty. Password rotation
//! rewraps it exactly like a media file.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use media_keyvault::{FileKey, MasterKey};

use crate::envelope::{FileHeader, FileMetadata};
use crate::error::VaultResult;
use crate::secure_fs;
use crate::stream::encrypt_body;

/// File name inside the vault root
pub const DATABASE_KEY_FILE: &str = "catalog.key";

const DATABASE_KEY_MIME: &str = "application/x-media-vault-key";

/// 256-bit key protecting the catalog database
pub struct DatabaseKey(FileKey);

impl DatabaseKey {
    /// Generate a key and store it at `path`, wrapped under `master`
    pub fn create(master: &MasterKey, path: &Path) -> VaultResult<Self> {
        let key = FileKey::generate();
        let header = FileHeader::seal(master, &key, &FileMetadata::new(DATABASE_KEY_FILE, DATABASE_KEY_MIME))?;

        secure_fs::write_atomic(path, |w| {
            header.write_to(w)?;
            encrypt_body(&key, io::empty(), w)?;
            Ok(())
        })?;

        log::info!("Catalog key created");
        Ok(Self(key))
    }

    /// Unwrap the stored key
    pub fn load(master: &MasterKey, path: &Path) -> VaultResult<Self> {
        let header = FileHeader::read_from(&mut BufReader::new(File::open(path)?))?;
        Ok(Self(header.unwrap_fek(master)?))
    }

    /// Raw key bytes for the catalog (use with caution)
    pub fn expose(&self) -> &[u8; 32] {
        self.0.expose()
    }
}

impl std::fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DatabaseKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DATABASE_KEY_FILE);
        let master = MasterKey::generate();

        let created = DatabaseKey::create(&master, &path).unwrap();
        let loaded = DatabaseKey::load(&master, &path).unwrap();
        assert_eq!(created.expose(), loaded.expose());
    }

    #[test]
    fn test_wrong_master_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DATABASE_KEY_FILE);
        DatabaseKey::create(&MasterKey::generate(), &path).unwrap();

        let result = DatabaseKey::load(&MasterKey::generate(), &path);
        assert!(matches!(result, Err(VaultError::Unwrap)));
    }
}
