//! Panic PIN verification hashing
//!
//! PINs never become encryption keys, so a fast keyed hash is enough here.
//! The HMAC key comes from a per-vault random PIN salt, never from the
//! master key.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::hkdf_derive::{derive_subkey_fixed, purposes};
use crate::error::{KeyVaultError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Minimum PIN length
pub const MIN_PIN_LEN: usize = 4;

/// One-way verification hash of a PIN
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationHash(#[serde(with = "hex")] [u8; 32]);

impl std::fmt::Debug for VerificationHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VerificationHash([REDACTED])")
    }
}

/// PIN must be ASCII digits only, at least four of them.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() < MIN_PIN_LEN {
        return Err(KeyVaultError::InvalidPin(format!(
            "must be at least {} digits",
            MIN_PIN_LEN
        )));
    }
    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyVaultError::InvalidPin("must contain digits only".into()));
    }
    Ok(())
}

fn pin_mac(pin: &str, pin_salt: &[u8]) -> Result<HmacSha256> {
    let key = derive_subkey_fixed::<32>(pin_salt, None, purposes::PANIC_PIN)?;
    let mut mac = HmacSha256::new_from_slice(&key[..])
        .map_err(|e| KeyVaultError::Crypto(e.to_string()))?;
    mac.update(pin.as_bytes());
    Ok(mac)
}

/// Hash a validated PIN for storage
pub fn hash_for_verification(pin: &str, pin_salt: &[u8]) -> Result<VerificationHash> {
    validate_pin(pin)?;
    let mac = pin_mac(pin, pin_salt)?;
    Ok(VerificationHash(mac.finalize().into_bytes().into()))
}

/// Constant-time check of a PIN against a stored hash.
///
/// Malformed PINs simply do not match.
pub fn verify_pin_hash(pin: &str, pin_salt: &[u8], expected: &VerificationHash) -> bool {
    if validate_pin(pin).is_err() {
        return false;
    }
    match pin_mac(pin, pin_salt) {
        Ok(mac) => mac.verify_slice(&expected.0).is_ok(),
        Err(_) => false,
    }
}
