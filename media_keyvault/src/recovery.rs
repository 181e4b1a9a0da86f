//! Recovery mnemonic
//!
//! A 24-word BIP39 phrase carries 256 bits of recovery entropy. The keystore
//! keeps two records built from it:
//!
//! ```text
//! master_by_recovery = AEAD(HKDF(entropy), MasterKey)   -> recover without password
//! escrow             = AEAD(MasterKey, entropy)         -> re-display / re-point on rotation
//! ```
//!
//! The phrase itself is never stored. Password rotation re-points both records
//! at the new master key, so a phrase written down once stays valid.

use bip39::{Language, Mnemonic};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{
    derive_subkey_fixed, purposes, unwrap_key, wrap_key, AeadCipher, MasterKey, RecoveryKey,
    WrappedKey, KEY_LEN,
};
use crate::error::{KeyVaultError, Result};

/// Words in a recovery phrase (256-bit entropy)
pub const WORD_COUNT: usize = 24;

const MASTER_AAD: &[u8] = b"media-vault:recovery:master";
const ESCROW_AAD: &[u8] = b"media-vault:recovery:escrow";

/// Human-transcribable recovery phrase
pub struct RecoveryArtifact {
    phrase: SecretString,
}

impl std::fmt::Debug for RecoveryArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoveryArtifact([REDACTED])")
    }
}

impl RecoveryArtifact {
    /// Parse user input.
    ///
    /// Words are lower-cased and whitespace is collapsed; nothing else is
    /// normalised. Word count, vocabulary and checksum are all checked here,
    /// so any error is `RecoveryFormat` and never touches key material.
    pub fn parse(input: &str) -> Result<Self> {
        let words: Vec<String> = input
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        if words.len() != WORD_COUNT {
            return Err(KeyVaultError::RecoveryFormat(format!(
                "expected {} words, got {}",
                WORD_COUNT,
                words.len()
            )));
        }

        let joined = words.join(" ");
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &joined)
            .map_err(|e| KeyVaultError::RecoveryFormat(e.to_string()))?;

        Ok(Self {
            phrase: SecretString::from(mnemonic.to_string()),
        })
    }

    fn from_key(key: &RecoveryKey) -> Result<Self> {
        let mnemonic = Mnemonic::from_entropy(key.expose())
            .map_err(|e| KeyVaultError::Crypto(format!("mnemonic encoding failed: {}", e)))?;
        Ok(Self {
            phrase: SecretString::from(mnemonic.to_string()),
        })
    }

    /// The phrase, space separated (use with caution)
    pub fn expose_phrase(&self) -> &str {
        self.phrase.expose_secret()
    }

    /// The words of the phrase, in order
    pub fn words(&self) -> Vec<&str> {
        self.phrase.expose_secret().split(' ').collect()
    }

    fn recovery_key(&self) -> Result<RecoveryKey> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, self.expose_phrase())
            .map_err(|e| KeyVaultError::RecoveryFormat(e.to_string()))?;
        let entropy = zeroize::Zeroizing::new(mnemonic.to_entropy());
        RecoveryKey::from_slice(&entropy).ok_or_else(|| {
            KeyVaultError::RecoveryFormat(format!("expected {} bytes of entropy", KEY_LEN))
        })
    }
}

fn wrapping_key(key: &RecoveryKey) -> Result<zeroize::Zeroizing<[u8; KEY_LEN]>> {
    derive_subkey_fixed::<KEY_LEN>(key.expose(), None, purposes::RECOVERY)
}

/// Persisted recovery material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Master key wrapped under the phrase-derived key
    pub master_by_recovery: WrappedKey,
    /// Phrase entropy wrapped under the master key
    pub escrow: WrappedKey,
    /// When the phrase was generated
    pub created_at: DateTime<Utc>,
}

impl RecoveryRecord {
    /// Generate a fresh phrase for `master`
    pub fn create(master: &MasterKey, cipher: AeadCipher) -> Result<(RecoveryArtifact, Self)> {
        let key = RecoveryKey::generate();
        let record = Self::build(master, &key, cipher, Utc::now())?;
        let artifact = RecoveryArtifact::from_key(&key)?;
        debug!("recovery phrase generated");
        Ok((artifact, record))
    }

    fn build(
        master: &MasterKey,
        key: &RecoveryKey,
        cipher: AeadCipher,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let wrap = wrapping_key(key)?;
        Ok(Self {
            master_by_recovery: wrap_key(master.expose(), &wrap, cipher, MASTER_AAD)?,
            escrow: wrap_key(key.expose(), master.expose(), cipher, ESCROW_AAD)?,
            created_at,
        })
    }

    fn escrowed_key(&self, master: &MasterKey) -> Result<RecoveryKey> {
        let bytes = unwrap_key(&self.escrow, master.expose(), ESCROW_AAD)?;
        Ok(RecoveryKey::from_bytes(*bytes))
    }

    /// Re-display the phrase from an unlocked session
    pub fn export(&self, master: &MasterKey) -> Result<RecoveryArtifact> {
        RecoveryArtifact::from_key(&self.escrowed_key(master)?)
    }

    /// Recover the master key from a phrase.
    ///
    /// A well-formed phrase that does not open this record is
    /// `RecoveryMismatch`.
    pub fn recover(&self, artifact: &RecoveryArtifact) -> Result<MasterKey> {
        let wrap = wrapping_key(&artifact.recovery_key()?)?;
        let bytes = unwrap_key(&self.master_by_recovery, &wrap, MASTER_AAD).map_err(|e| match e {
            KeyVaultError::AuthFailed => KeyVaultError::RecoveryMismatch,
            other => other,
        })?;
        Ok(MasterKey::from_bytes(*bytes))
    }

    /// Same phrase, now pointing at `new_master`
    pub fn rewrap(&self, old_master: &MasterKey, new_master: &MasterKey) -> Result<Self> {
        let key = self.escrowed_key(old_master)?;
        Self::build(new_master, &key, self.master_by_recovery.cipher, self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_recover() {
        let master = MasterKey::generate();
        let (artifact, record) = RecoveryRecord::create(&master, AeadCipher::default()).unwrap();

        assert_eq!(artifact.words().len(), WORD_COUNT);
        let parsed = RecoveryArtifact::parse(artifact.expose_phrase()).unwrap();
        let recovered = record.recover(&parsed).unwrap();
        assert_eq!(recovered.expose(), master.expose());
    }

    #[test]
    fn test_export_returns_same_phrase() {
        let master = MasterKey::generate();
        let (artifact, record) = RecoveryRecord::create(&master, AeadCipher::default()).unwrap();
        let exported = record.export(&master).unwrap();
        assert_eq!(exported.expose_phrase(), artifact.expose_phrase());
    }

    #[test]
    fn test_export_with_wrong_master_fails() {
        let master = MasterKey::generate();
        let (_, record) = RecoveryRecord::create(&master, AeadCipher::default()).unwrap();
        let result = record.export(&MasterKey::generate());
        assert!(matches!(result, Err(KeyVaultError::AuthFailed)));
    }

    #[test]
    fn test_wrong_word_count_is_format_error() {
        let result = RecoveryArtifact::parse("abandon abandon abandon");
        assert!(matches!(result, Err(KeyVaultError::RecoveryFormat(_))));
    }

    #[test]
    fn test_bad_checksum_is_format_error() {
        let phrase = vec!["abandon"; WORD_COUNT].join(" ");
        let result = RecoveryArtifact::parse(&phrase);
        assert!(matches!(result, Err(KeyVaultError::RecoveryFormat(_))));
    }

    #[test]
    fn test_unknown_word_is_format_error() {
        let mut words = vec!["abandon"; WORD_COUNT - 1];
        words.push("notaword");
        let result = RecoveryArtifact::parse(&words.join(" "));
        assert!(matches!(result, Err(KeyVaultError::RecoveryFormat(_))));
    }

    #[test]
    fn test_other_vault_phrase_is_mismatch() {
        let (_, record) = RecoveryRecord::create(&MasterKey::generate(), AeadCipher::default()).unwrap();
        let (other, _) = RecoveryRecord::create(&MasterKey::generate(), AeadCipher::default()).unwrap();

        let result = record.recover(&other);
        assert!(matches!(result, Err(KeyVaultError::RecoveryMismatch)));
    }

    #[test]
    fn test_parse_tolerates_case_and_spacing() {
        let master = MasterKey::generate();
        let (artifact, record) = RecoveryRecord::create(&master, AeadCipher::default()).unwrap();
        let messy = format!("  {}\n", artifact.expose_phrase().to_uppercase().replace(' ', "   "));

        let parsed = RecoveryArtifact::parse(&messy).unwrap();
        assert_eq!(record.recover(&parsed).unwrap().expose(), master.expose());
    }

    #[test]
    fn test_rewrap_keeps_phrase() {
        let old = MasterKey::generate();
        let new = MasterKey::generate();
        let (artifact, record) = RecoveryRecord::create(&old, AeadCipher::default()).unwrap();

        let rewrapped = record.rewrap(&old, &new).unwrap();
        assert_eq!(rewrapped.recover(&artifact).unwrap().expose(), new.expose());
        assert_eq!(rewrapped.export(&new).unwrap().expose_phrase(), artifact.expose_phrase());
        assert_eq!(rewrapped.created_at, record.created_at);
    }
}
