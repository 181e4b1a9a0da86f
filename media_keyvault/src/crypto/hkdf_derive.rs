//! HKDF-SHA256 purpose-bound sub-keys

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KeyVaultError, Result};

/// Predefined derivation purposes
pub mod purposes {
    /// Recovery key carried by the mnemonic
    pub const RECOVERY: &str = "MEDIA_VAULT:recovery:v1";
    /// HMAC key for panic PIN verification hashes
    pub const PANIC_PIN: &str = "MEDIA_VAULT:panic-pin:v1";
}

/// Derive a fixed-length sub-key from input key material
pub fn derive_subkey_fixed<const N: usize>(
    ikm: &[u8],
    salt: Option<&[u8]>,
    purpose: &str,
) -> Result<Zeroizing<[u8; N]>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut output = Zeroizing::new([0u8; N]);
    hk.expand(purpose.as_bytes(), &mut output[..])
        .map_err(|e| KeyVaultError::Crypto(format!("HKDF expand failed: {}", e)))?;

    Ok(output)
}
