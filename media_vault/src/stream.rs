//! Media Vault - Streaming body cipher
//!
//! The body is split into 64 KiB plaintext chunks, each sealed with the
//! file key:
//!
//! ```text
//! [BASE_NONCE 12B]
//! [CHUNK 0][AES-256-GCM, nonce = base ^ 0, AAD = "body" || 0u64 LE || final]
//! [CHUNK 1]...
//! ```
//!
//! Only the last chunk has `final = 1`, and at least one chunk (possibly
//! empty) is always written, so cutting the file at a chunk boundary fails
//! authentication instead of yielding a shorter plaintext.

use std::io::{self, BufRead, Read, Write};

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use media_keyvault::FileKey;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::envelope::TAG_LEN;
use crate::error::{VaultError, VaultResult};

/// Plaintext bytes per chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Base nonce prefix of every body
pub const BASE_NONCE_LEN: usize = 12;

const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_LEN;

/// Per-chunk nonce: base nonce XOR chunk index
fn chunk_nonce(base: &[u8; BASE_NONCE_LEN], index: u64) -> [u8; BASE_NONCE_LEN] {
    let mut nonce = *base;
    for (n, i) in nonce.iter_mut().zip(index.to_le_bytes()) {
        *n ^= i;
    }
    nonce
}

fn chunk_aad(index: u64, is_final: bool) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..4].copy_from_slice(b"body");
    aad[4..12].copy_from_slice(&index.to_le_bytes());
    aad[12] = is_final as u8;
    aad
}

/// Fill `buf` as far as the reader allows; short only at EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read the next plaintext chunk into `buf`, resizing it to the bytes read
fn fill_chunk<R: Read>(source: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    buf.resize(CHUNK_SIZE, 0);
    let n = read_full(source, buf)?;
    buf.truncate(n);
    Ok(n)
}

// ═══════════════════════════════════════════════════════════════════════════
// ENCRYPT
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt everything `source` yields into `dest`. Returns plaintext length.
///
/// Holds at most two chunks in memory: the one being sealed and the one read
/// ahead to decide whether the current chunk is final.
pub fn encrypt_body<R: Read, W: Write>(fek: &FileKey, mut source: R, dest: &mut W) -> VaultResult<u64> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(fek.expose()));

    let mut base_nonce = [0u8; BASE_NONCE_LEN];
    OsRng.fill_bytes(&mut base_nonce);
    dest.write_all(&base_nonce)?;

    let mut current = Zeroizing::new(Vec::with_capacity(ENCRYPTED_CHUNK_SIZE));
    let mut ahead = Zeroizing::new(Vec::with_capacity(ENCRYPTED_CHUNK_SIZE));

    let mut len = fill_chunk(&mut source, &mut current)?;
    let mut index = 0u64;
    let mut total = 0u64;

    loop {
        let ahead_len = if len == CHUNK_SIZE {
            fill_chunk(&mut source, &mut ahead)?
        } else {
            0
        };
        let is_final = ahead_len == 0;

        cipher
            .encrypt_in_place(
                Nonce::from_slice(&chunk_nonce(&base_nonce, index)),
                &chunk_aad(index, is_final),
                &mut *current,
            )
            .map_err(|e| VaultError::Crypto(format!("chunk {} seal failed: {}", index, e)))?;
        dest.write_all(&current)?;
        total += len as u64;

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut ahead);
        len = ahead_len;
        index += 1;
    }

    Ok(total)
}

// ═══════════════════════════════════════════════════════════════════════════
// DECRYPT
// ═══════════════════════════════════════════════════════════════════════════

/// Lazy, single-pass decrypting reader over an encrypted body.
///
/// Authentication failures surface from `read` as an `io::Error` carrying
/// `VaultError::Unwrap`; `VaultError::from` restores it.
pub struct BodyDecryptor<R: BufRead> {
    inner: R,
    cipher: Aes256Gcm,
    base_nonce: [u8; BASE_NONCE_LEN],
    index: u64,
    chunk: Zeroizing<Vec<u8>>,
    pos: usize,
    done: bool,
}

impl<R: BufRead> BodyDecryptor<R> {
    /// Consume the base nonce; chunks are decrypted on demand
    pub fn new(fek: &FileKey, mut inner: R) -> VaultResult<Self> {
        let mut base_nonce = [0u8; BASE_NONCE_LEN];
        if read_full(&mut inner, &mut base_nonce)? != BASE_NONCE_LEN {
            return Err(VaultError::Unwrap);
        }

        Ok(Self {
            inner,
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(fek.expose())),
            base_nonce,
            index: 0,
            chunk: Zeroizing::new(Vec::with_capacity(ENCRYPTED_CHUNK_SIZE)),
            pos: 0,
            done: false,
        })
    }

    fn next_chunk(&mut self) -> VaultResult<()> {
        self.chunk.resize(ENCRYPTED_CHUNK_SIZE, 0);
        let n = read_full(&mut self.inner, &mut self.chunk)?;
        self.chunk.truncate(n);
        self.pos = 0;

        // Missing final chunk means the body was cut short.
        if n < TAG_LEN {
            return Err(VaultError::Unwrap);
        }

        let is_final = n < ENCRYPTED_CHUNK_SIZE || self.inner.fill_buf()?.is_empty();

        self.cipher
            .decrypt_in_place(
                Nonce::from_slice(&chunk_nonce(&self.base_nonce, self.index)),
                &chunk_aad(self.index, is_final),
                &mut *self.chunk,
            )
            .map_err(|_| {
                self.chunk.clear();
                VaultError::Unwrap
            })?;

        self.index += 1;
        self.done = is_final;
        Ok(())
    }

    /// Read and authenticate the rest of the body without keeping it
    pub fn verify_to_end(mut self) -> VaultResult<u64> {
        io::copy(&mut self, &mut io::sink()).map_err(VaultError::from)
    }
}

impl<R: BufRead> Read for BodyDecryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            if self.done {
                return Ok(0);
            }
            self.next_chunk()?;
        }

        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    fn encrypt(fek: &FileKey, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let n = encrypt_body(fek, Cursor::new(data), &mut out).unwrap();
        assert_eq!(n, data.len() as u64);
        out
    }

    fn decrypt(fek: &FileKey, body: &[u8]) -> VaultResult<Vec<u8>> {
        let mut reader = BodyDecryptor::new(fek, BufReader::new(Cursor::new(body)))?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_sizes() {
        let fek = FileKey::generate();
        for size in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let body = encrypt(&fek, &data);
            assert_eq!(decrypt(&fek, &body).unwrap(), data, "size {}", size);
        }
    }

    #[test]
    fn test_empty_body_has_one_chunk() {
        let fek = FileKey::generate();
        let body = encrypt(&fek, b"");
        assert_eq!(body.len(), BASE_NONCE_LEN + TAG_LEN);
    }

    #[test]
    fn test_exact_chunk_has_no_trailing_empty_chunk() {
        let fek = FileKey::generate();
        let body = encrypt(&fek, &vec![7u8; CHUNK_SIZE]);
        assert_eq!(body.len(), BASE_NONCE_LEN + ENCRYPTED_CHUNK_SIZE);
    }

    #[test]
    fn test_truncation_at_chunk_boundary_detected() {
        let fek = FileKey::generate();
        let body = encrypt(&fek, &vec![1u8; 2 * CHUNK_SIZE + 10]);
        let cut = &body[..BASE_NONCE_LEN + 2 * ENCRYPTED_CHUNK_SIZE];
        assert!(matches!(decrypt(&fek, cut), Err(VaultError::Unwrap)));
    }

    #[test]
    fn test_dropped_final_chunk_detected() {
        let fek = FileKey::generate();
        let body = encrypt(&fek, &vec![1u8; CHUNK_SIZE]);
        assert!(matches!(
            decrypt(&fek, &body[..BASE_NONCE_LEN]),
            Err(VaultError::Unwrap)
        ));
    }

    #[test]
    fn test_appended_chunk_detected() {
        let fek = FileKey::generate();
        let mut body = encrypt(&fek, b"short");
        body.extend_from_slice(&[0u8; 40]);
        assert!(matches!(decrypt(&fek, &body), Err(VaultError::Unwrap)));
    }

    #[test]
    fn test_bit_flip_detected() {
        let fek = FileKey::generate();
        let mut body = encrypt(&fek, &vec![9u8; CHUNK_SIZE + 100]);
        body[BASE_NONCE_LEN + CHUNK_SIZE + 50] ^= 0x04;
        assert!(matches!(decrypt(&fek, &body), Err(VaultError::Unwrap)));
    }

    #[test]
    fn test_wrong_key_detected() {
        let body = encrypt(&FileKey::generate(), b"secret");
        assert!(matches!(
            decrypt(&FileKey::generate(), &body),
            Err(VaultError::Unwrap)
        ));
    }

    #[test]
    fn test_chunk_nonce_xor() {
        let base = [0xFFu8; BASE_NONCE_LEN];
        let nonce = chunk_nonce(&base, 1);
        assert_eq!(nonce[0], 0xFE);
        assert_eq!(&nonce[1..], &base[1..]);
    }
}
