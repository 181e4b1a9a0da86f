//! Zeroizing 256-bit key types
//!
//! Each role gets its own type so a file key can never be passed where the
//! master key is expected.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};

/// Length of every symmetric key in the vault (AES-256 / XChaCha20).
pub const KEY_LEN: usize = 32;

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name {
            inner: SecretBox<[u8; KEY_LEN]>,
        }

        impl $name {
            /// Wrap raw key bytes.
            pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self {
                    inner: SecretBox::new(Box::new(bytes)),
                }
            }

            /// Build from a slice, `None` unless it is exactly 32 bytes.
            pub fn from_slice(slice: &[u8]) -> Option<Self> {
                let bytes: [u8; KEY_LEN] = slice.try_into().ok()?;
                Some(Self::from_bytes(bytes))
            }

            /// Generate a fresh random key from the OS RNG.
            pub fn generate() -> Self {
                let mut bytes = [0u8; KEY_LEN];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                Self::from_bytes(bytes)
            }

            /// Expose the key bytes (use with caution)
            pub fn expose(&self) -> &[u8; KEY_LEN] {
                self.inner.expose_secret()
            }

            /// Byte-for-byte copy; the copy is zeroized independently.
            pub fn duplicate(&self) -> Self {
                Self::from_bytes(*self.expose())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(concat!(stringify!($name), "([REDACTED])"))
            }
        }
    };
}

secret_key!(
    /// Session key that wraps every FEK and the database key.
    MasterKey
);

secret_key!(
    /// Key-encryption key derived from the user secret; wraps the master key.
    Kek
);

secret_key!(
    /// Per-file encryption key. Also used for the catalog database key.
    FileKey
);

secret_key!(
    /// Key carried by the recovery mnemonic.
    RecoveryKey
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let a = FileKey::generate();
        let b = FileKey::generate();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_from_slice_length() {
        assert!(MasterKey::from_slice(&[7u8; 32]).is_some());
        assert!(MasterKey::from_slice(&[7u8; 31]).is_none());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = MasterKey::from_bytes([0xAB; 32]);
        let shown = format!("{:?}", key);
        assert_eq!(shown, "MasterKey([REDACTED])");
        assert!(!shown.contains("171"));
    }
}
