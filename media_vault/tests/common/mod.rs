#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use media_vault::{Argon2Config, RecoveryArtifact, Session, Vault, VaultConfig};
use secrecy::SecretString;

pub const OLD: &str = "correct horse battery staple";
pub const NEW: &str = "tr0ub4dor&3 but longer";

pub fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

/// Cheap KDF so each test unlocks in milliseconds
pub fn fast_config() -> VaultConfig {
    VaultConfig {
        kdf: Argon2Config {
            time_cost: 1,
            memory_cost_kib: 1024,
            parallelism: 1,
        },
        wipe_passes: 1,
        ..VaultConfig::default()
    }
}

pub fn create_vault(root: &Path) -> (Vault, Session, RecoveryArtifact) {
    Vault::create(root, &secret(OLD), fast_config()).unwrap()
}

/// Encrypt `count` small files; returns their paths and plaintexts
pub fn populate(vault: &Vault, session: &Session, count: usize) -> Vec<(PathBuf, Vec<u8>)> {
    (0..count)
        .map(|i| {
            let data = format!("media file number {}", i).repeat(i + 1).into_bytes();
            let (path, _) = vault
                .encrypt(session, Cursor::new(data.clone()), &format!("clip{}.txt", i), "text/plain")
                .unwrap();
            (path, data)
        })
        .collect()
}

pub fn read_all(vault: &Vault, session: &Session, path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    vault
        .decrypt_to_stream(session, path)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    out
}
