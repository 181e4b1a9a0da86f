//! Cryptographic primitives - Argon2id, AEAD key wrapping, HKDF, PIN hashing

mod aead;
mod argon2_kdf;
mod hkdf_derive;
mod keys;
mod pin;

pub use aead::{unwrap_key, wrap_key, AeadCipher, WrappedKey};
pub use argon2_kdf::{derive_kek, generate_salt, Argon2Config, SALT_LEN};
pub use hkdf_derive::{derive_subkey_fixed, purposes};
pub use keys::{FileKey, Kek, MasterKey, RecoveryKey, KEY_LEN};
pub use pin::{hash_for_verification, validate_pin, verify_pin_hash, VerificationHash, MIN_PIN_LEN};
