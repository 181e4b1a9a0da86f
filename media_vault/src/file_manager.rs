//! Media Vault - File manager
//!
//! Turns plaintext files into envelopes under `files/` and back. Every call
//! takes the master key explicitly; nothing here stores it.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use media_keyvault::{FileKey, MasterKey};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::envelope::{FileHeader, FileMetadata, TAG_LEN};
use crate::error::{VaultError, VaultResult};
use crate::locks::{PathLocks, RotationGate};
use crate::secure_fs;
use crate::stream::{encrypt_body, BodyDecryptor, CHUNK_SIZE};

/// Extension of envelope files
pub const VAULT_EXTENSION: &str = "vault";

const READ_BUF_SIZE: usize = CHUNK_SIZE + TAG_LEN;

/// Lazily decrypted file content.
///
/// Dropping it before EOF closes the file and zeroizes the buffered
/// plaintext and the key schedule.
pub struct DecryptedStream {
    metadata: FileMetadata,
    body: BodyDecryptor<BufReader<File>>,
}

impl DecryptedStream {
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

impl Read for DecryptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

/// Result of importing a file
#[derive(Debug, Clone)]
pub struct ImportedFile {
    /// Envelope path inside the vault
    pub path: PathBuf,
    /// Decrypted metadata of the envelope
    pub metadata: FileMetadata,
    /// True when the source already was an envelope for this vault
    pub adopted: bool,
}

/// Envelope file operations
pub struct VaultFileManager {
    files_dir: PathBuf,
    wipe_passes: u32,
    paths: PathLocks,
    gate: RotationGate,
}

impl VaultFileManager {
    pub fn new(files_dir: impl Into<PathBuf>, wipe_passes: u32) -> Self {
        Self {
            files_dir: files_dir.into(),
            wipe_passes,
            paths: PathLocks::new(),
            gate: RotationGate::default(),
        }
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENCRYPT
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt `source` into a new envelope at `destination`.
    ///
    /// Fresh FEK and IV per call, so identical input never produces
    /// identical output. The envelope appears atomically.
    pub fn encrypt<R: Read>(
        &self,
        master: &MasterKey,
        source: R,
        destination: &Path,
        filename: &str,
        mime_type: &str,
    ) -> VaultResult<FileHeader> {
        let _shared = self.gate.shared();
        let _path = self.paths.lock(destination);

        let fek = FileKey::generate();
        let header = FileHeader::seal(master, &fek, &FileMetadata::new(filename, mime_type))?;

        let bytes = secure_fs::write_atomic(destination, |w| {
            header.write_to(w)?;
            encrypt_body(&fek, source, w)
        })?;

        log::info!("Encrypted {} bytes into {}", bytes, destination.display());
        Ok(header)
    }

    /// Bring a file on disk into the vault and securely delete the source.
    ///
    /// A source that already is an envelope readable with `master` is moved
    /// in unchanged. Anything else, including envelopes of another vault, is
    /// treated as plaintext.
    pub fn import_file(
        &self,
        master: &MasterKey,
        source: &Path,
        mime_type: Option<&str>,
    ) -> VaultResult<ImportedFile> {
        let destination = self
            .files_dir
            .join(format!("{}.{}", Uuid::new_v4(), VAULT_EXTENSION));

        if let Some(metadata) = self.probe_envelope(master, source)? {
            self.adopt(source, &destination)?;
            log::info!("Adopted existing envelope as {}", destination.display());
            return Ok(ImportedFile {
                path: destination,
                metadata,
                adopted: true,
            });
        }

        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".into());
        let mime_type = match mime_type {
            Some(m) => m.to_string(),
            None => sniff_mime(source)?,
        };

        let input = BufReader::with_capacity(CHUNK_SIZE, File::open(source)?);
        let header = self.encrypt(master, input, &destination, &filename, &mime_type)?;
        let metadata = header.open_metadata(&header.unwrap_fek(master)?)?;

        secure_fs::secure_delete(source, self.wipe_passes)?;

        Ok(ImportedFile {
            path: destination,
            metadata,
            adopted: false,
        })
    }

    fn probe_envelope(&self, master: &MasterKey, source: &Path) -> VaultResult<Option<FileMetadata>> {
        let mut reader = BufReader::new(File::open(source)?);
        let header = match FileHeader::read_from(&mut reader) {
            Ok(h) => h,
            Err(VaultError::Format(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let opened = header
            .unwrap_fek(master)
            .and_then(|fek| header.open_metadata(&fek));
        match opened {
            Ok(metadata) => Ok(Some(metadata)),
            Err(VaultError::Unwrap) | Err(VaultError::Format(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn adopt(&self, source: &Path, destination: &Path) -> VaultResult<()> {
        let _shared = self.gate.shared();
        let _path = self.paths.lock(destination);

        fs::create_dir_all(&self.files_dir)?;
        if fs::rename(source, destination).is_ok() {
            return Ok(());
        }
        // Different filesystem: copy, then drop the source.
        let mut input = File::open(source)?;
        secure_fs::write_atomic(destination, |w| {
            io::copy(&mut input, w)?;
            Ok(())
        })?;
        fs::remove_file(source)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DECRYPT
    // ═══════════════════════════════════════════════════════════════════════

    /// Open an envelope for streaming decryption.
    ///
    /// Header, key and metadata are checked up front; body chunks are
    /// authenticated as they are read.
    pub fn decrypt_to_stream(&self, master: &MasterKey, path: &Path) -> VaultResult<DecryptedStream> {
        let _shared = self.gate.shared();
        let _path = self.paths.lock(path);

        let mut reader = BufReader::with_capacity(READ_BUF_SIZE, File::open(path)?);
        let header = FileHeader::read_from(&mut reader)?;
        let fek = header.unwrap_fek(master)?;
        let metadata = header.open_metadata(&fek)?;
        let body = BodyDecryptor::new(&fek, reader)?;

        Ok(DecryptedStream { metadata, body })
    }

    /// Decrypt into a new file in `dir`. The caller owns and must delete it.
    ///
    /// Partial plaintext is securely deleted if decryption fails midway.
    pub fn decrypt_to_temporary_file(
        &self,
        master: &MasterKey,
        path: &Path,
        dir: &Path,
    ) -> VaultResult<PathBuf> {
        let mut stream = self.decrypt_to_stream(master, path)?;
        let suffix = Path::new(&stream.metadata().filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut temp = tempfile::Builder::new()
            .prefix("mv-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        let copied = io::copy(&mut stream, temp.as_file_mut())
            .and_then(|_| temp.as_file().sync_all());

        let (_, out) = temp.keep().map_err(|e| VaultError::from(e.error))?;
        if let Err(e) = copied {
            secure_fs::secure_delete(&out, self.wipe_passes)?;
            return Err(e.into());
        }

        log::debug!("Decrypted {} to temporary file", path.display());
        Ok(out)
    }

    /// Header and metadata only; the body is not read
    pub fn peek_metadata(&self, master: &MasterKey, path: &Path) -> VaultResult<FileMetadata> {
        let header = self.read_header(path)?;
        header.open_metadata(&header.unwrap_fek(master)?)
    }

    /// Whether `master` can open the envelope at `path`
    pub fn can_unwrap(&self, master: &MasterKey, path: &Path) -> VaultResult<bool> {
        match self.read_header(path)?.unwrap_fek(master) {
            Ok(_) => Ok(true),
            Err(VaultError::Unwrap) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_header(&self, path: &Path) -> VaultResult<FileHeader> {
        let _shared = self.gate.shared();
        let _path = self.paths.lock(path);
        FileHeader::read_from(&mut BufReader::new(File::open(path)?))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DELETE / LIST
    // ═══════════════════════════════════════════════════════════════════════

    /// Securely delete an envelope. `false` if it was already gone.
    pub fn secure_delete(&self, path: &Path) -> VaultResult<bool> {
        let _shared = self.gate.shared();
        let _path = self.paths.lock(path);
        secure_fs::secure_delete(path, self.wipe_passes)
    }

    /// All envelopes in the files directory, sorted by path
    pub fn list_files(&self) -> VaultResult<Vec<PathBuf>> {
        list_envelopes(&self.files_dir)
    }

    /// Hold off rotation while the caller reads its master key and works
    pub fn shared(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.gate.shared()
    }

    /// Take the vault-wide lock; no other file operation runs until dropped
    pub fn exclusive(&self) -> ExclusiveFiles<'_> {
        ExclusiveFiles {
            manager: self,
            _guard: self.gate.exclusive(),
        }
    }
}

/// Exclusive access to every envelope, used by password rotation
pub struct ExclusiveFiles<'a> {
    manager: &'a VaultFileManager,
    _guard: parking_lot::RwLockWriteGuard<'a, ()>,
}

impl ExclusiveFiles<'_> {
    pub fn files_dir(&self) -> &Path {
        self.manager.files_dir()
    }

    pub fn list_files(&self) -> VaultResult<Vec<PathBuf>> {
        self.manager.list_files()
    }

    /// Rewrap the header at `path` from `from` to `to`.
    ///
    /// Idempotent: returns `Ok(false)` when `to` already opens it. The body
    /// bytes are copied as they are, never decrypted.
    pub fn rewrap(&self, path: &Path, from: &MasterKey, to: &MasterKey) -> VaultResult<bool> {
        let mut reader = BufReader::with_capacity(READ_BUF_SIZE, File::open(path)?);
        let header = FileHeader::read_from(&mut reader)?;

        if header.unwrap_fek(to).is_ok() {
            return Ok(false);
        }
        let rewrapped = header.rewrapped(from, to)?;

        secure_fs::write_atomic(path, |w| {
            rewrapped.write_to(w)?;
            io::copy(&mut reader, w)?;
            Ok(())
        })?;
        Ok(true)
    }
}

pub(crate) fn list_envelopes(dir: &Path) -> VaultResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().map_or(false, |e| e == VAULT_EXTENSION)
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Guess a MIME type from magic bytes
fn sniff_mime(path: &Path) -> VaultResult<String> {
    let mut head = [0u8; 16];
    let mut file = File::open(path)?;
    let mut n = 0;
    while n < head.len() {
        match file.read(&mut head[n..])? {
            0 => break,
            read => n += read,
        }
    }
    Ok(detect_mime(&head[..n]).to_string())
}

fn detect_mime(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return "application/octet-stream";
    }

    match data {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => "image/png",
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif",
        [0x25, 0x50, 0x44, 0x46, ..] => "application/pdf",
        [0x49, 0x44, 0x33, ..] | [0xFF, 0xFB, ..] => "audio/mpeg",
        [0x4F, 0x67, 0x67, 0x53, ..] => "audio/ogg",
        [0x50, 0x4B, 0x03, 0x04, ..] => "application/zip",
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, b'W', b'A', b'V', b'E', ..] => "audio/wav",
        [_, _, _, _, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'c', ..]
        | [_, _, _, _, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'x', ..] => "image/heic",
        [_, _, _, _, b'f', b't', b'y', b'p', b'm', b'i', b'f', b'1', ..] => "image/heif",
        [_, _, _, _, b'f', b't', b'y', b'p', b'M', b'4', b'A', b' ', ..] => "audio/mp4",
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => "video/mp4",
        _ if std::str::from_utf8(data).is_ok() => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> VaultFileManager {
        VaultFileManager::new(dir.join("files"), 1)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dir = tempdir().unwrap();
        let files = manager(dir.path());
        let master = MasterKey::generate();
        let dest = dir.path().join("files").join("a.vault");

        files
            .encrypt(&master, Cursor::new(b"hello vault"), &dest, "hello.txt", "text/plain")
            .unwrap();

        let mut stream = files.decrypt_to_stream(&master, &dest).unwrap();
        assert_eq!(stream.metadata().filename, "hello.txt");
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello vault");
    }

    #[test]
    fn test_import_plaintext_deletes_source() {
        let dir = tempdir().unwrap();
        let files = manager(dir.path());
        let master = MasterKey::generate();
        let source = dir.path().join("photo.png");
        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&[0u8; 100]);
        fs::write(&source, &png).unwrap();

        let imported = files.import_file(&master, &source, None).unwrap();
        assert!(!source.exists());
        assert!(!imported.adopted);
        assert_eq!(imported.metadata.mime_type, "image/png");
        assert_eq!(imported.metadata.filename, "photo.png");
        assert_eq!(files.list_files().unwrap(), vec![imported.path.clone()]);
    }

    #[test]
    fn test_import_adopts_own_envelope() {
        let dir = tempdir().unwrap();
        let files = manager(dir.path());
        let master = MasterKey::generate();
        let outside = dir.path().join("backup.vault");
        files
            .encrypt(&master, Cursor::new(b"x"), &outside, "x.txt", "text/plain")
            .unwrap();
        let original = fs::read(&outside).unwrap();

        let imported = files.import_file(&master, &outside, None).unwrap();
        assert!(imported.adopted);
        assert_eq!(fs::read(&imported.path).unwrap(), original);
    }

    #[test]
    fn test_import_foreign_envelope_as_plaintext() {
        let dir = tempdir().unwrap();
        let files = manager(dir.path());
        let foreign = dir.path().join("other.vault");
        files
            .encrypt(&MasterKey::generate(), Cursor::new(b"x"), &foreign, "x", "text/plain")
            .unwrap();

        let master = MasterKey::generate();
        let imported = files.import_file(&master, &foreign, None).unwrap();
        assert!(!imported.adopted);
        assert_eq!(imported.metadata.filename, "other.vault");
    }

    #[test]
    fn test_decrypt_to_temporary_file() {
        let dir = tempdir().unwrap();
        let files = manager(dir.path());
        let master = MasterKey::generate();
        let dest = dir.path().join("files").join("n.vault");
        files
            .encrypt(&master, Cursor::new(b"note"), &dest, "note.md", "text/markdown")
            .unwrap();

        let out = files
            .decrypt_to_temporary_file(&master, &dest, dir.path())
            .unwrap();
        assert_eq!(out.extension().unwrap(), "md");
        assert_eq!(fs::read(&out).unwrap(), b"note");
    }

    #[test]
    fn test_rewrap_is_idempotent() {
        let dir = tempdir().unwrap();
        let files = manager(dir.path());
        let old = MasterKey::generate();
        let new = MasterKey::generate();
        let dest = dir.path().join("files").join("r.vault");
        files
            .encrypt(&old, Cursor::new(vec![3u8; 100_000]), &dest, "r", "application/octet-stream")
            .unwrap();

        let exclusive = files.exclusive();
        assert!(exclusive.rewrap(&dest, &old, &new).unwrap());
        assert!(!exclusive.rewrap(&dest, &old, &new).unwrap());
        drop(exclusive);

        assert!(!files.can_unwrap(&old, &dest).unwrap());
        let mut out = Vec::new();
        files
            .decrypt_to_stream(&new, &dest)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, vec![3u8; 100_000]);
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(detect_mime(b"%PDF-1.7"), "application/pdf");
        assert_eq!(detect_mime(b"\0\0\0\x18ftypisom"), "video/mp4");
        assert_eq!(detect_mime(b"plain words"), "text/plain");
        assert_eq!(detect_mime(&[0x00, 0xFE, 0xFF, 0x80, 0x81]), "application/octet-stream");
        assert_eq!(detect_mime(&[]), "application/octet-stream");
    }
}
