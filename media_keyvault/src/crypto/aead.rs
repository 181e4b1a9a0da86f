//! AEAD key wrapping - AES-256-GCM and XChaCha20-Poly1305

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::KEY_LEN;
use crate::error::{KeyVaultError, Result};

/// AEAD cipher used for keystore records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadCipher {
    /// AES-256-GCM (12-byte nonce)
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// XChaCha20-Poly1305 (24-byte nonce) - preferred
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl Default for AeadCipher {
    fn default() -> Self {
        Self::XChaCha20Poly1305
    }
}

impl AeadCipher {
    pub fn nonce_len(&self) -> usize {
        match self {
            Self::Aes256Gcm => 12,
            Self::XChaCha20Poly1305 => 24,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }
}

/// A 256-bit key encrypted under another key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub cipher: AeadCipher,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// Encrypt `key` under `wrapping_key`, binding `aad` into the tag.
pub fn wrap_key(
    key: &[u8; KEY_LEN],
    wrapping_key: &[u8; KEY_LEN],
    cipher: AeadCipher,
    aad: &[u8],
) -> Result<WrappedKey> {
    let mut nonce = vec![0u8; cipher.nonce_len()];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| KeyVaultError::Crypto(format!("RNG failed: {}", e)))?;

    let payload = Payload { msg: &key[..], aad };
    let ciphertext = match cipher {
        AeadCipher::Aes256Gcm => Aes256Gcm::new_from_slice(wrapping_key)
            .map_err(|e| KeyVaultError::Crypto(e.to_string()))?
            .encrypt(AesNonce::from_slice(&nonce), payload),
        AeadCipher::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(wrapping_key)
            .map_err(|e| KeyVaultError::Crypto(e.to_string()))?
            .encrypt(XNonce::from_slice(&nonce), payload),
    }
    .map_err(|e| KeyVaultError::Crypto(format!("{} wrap failed: {}", cipher.name(), e)))?;

    Ok(WrappedKey {
        cipher,
        nonce,
        ciphertext,
    })
}

/// Decrypt a wrapped key. Any authentication failure is `AuthFailed`.
pub fn unwrap_key(
    wrapped: &WrappedKey,
    wrapping_key: &[u8; KEY_LEN],
    aad: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if wrapped.nonce.len() != wrapped.cipher.nonce_len() {
        return Err(KeyVaultError::Crypto(format!(
            "Invalid {} nonce length",
            wrapped.cipher.name()
        )));
    }

    let payload = Payload {
        msg: wrapped.ciphertext.as_slice(),
        aad,
    };
    let plaintext = Zeroizing::new(
        match wrapped.cipher {
            AeadCipher::Aes256Gcm => Aes256Gcm::new_from_slice(wrapping_key)
                .map_err(|e| KeyVaultError::Crypto(e.to_string()))?
                .decrypt(AesNonce::from_slice(&wrapped.nonce), payload),
            AeadCipher::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(wrapping_key)
                .map_err(|e| KeyVaultError::Crypto(e.to_string()))?
                .decrypt(XNonce::from_slice(&wrapped.nonce), payload),
        }
        .map_err(|_| KeyVaultError::AuthFailed)?,
    );

    if plaintext.len() != KEY_LEN {
        return Err(KeyVaultError::Crypto("Invalid wrapped key length".into()));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
