//! Media Vault - Secure Filesystem Operations
//!
//! Atomic replacement of vault files and multi-pass secure deletion.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Default number of overwrite passes for secure delete
pub const DEFAULT_WIPE_PASSES: u32 = 3;

const WIPE_BUF_SIZE: usize = 64 * 1024;

/// Write `path` through a sibling temp file, then rename over it.
///
/// `fill` writes the full content. The temp file is flushed and fsynced
/// before the rename; on any error it is removed and `path` is untouched.
pub fn write_atomic<T, F>(path: &Path, fill: F) -> VaultResult<T>
where
    F: FnOnce(&mut BufWriter<&File>) -> VaultResult<T>,
{
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)?;

    let temp = tempfile::Builder::new()
        .prefix(".mv-")
        .suffix(".tmp")
        .tempfile_in(&parent)?;

    let value = {
        let mut writer = BufWriter::new(temp.as_file());
        let value = fill(&mut writer)?;
        writer.flush()?;
        value
    };
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| VaultError::from(e.error))?;
    sync_dir(&parent);
    Ok(value)
}

/// Overwrite with random data `passes` times, fsync each pass, rename to a
/// random name, then unlink.
///
/// Returns `Ok(false)` if `path` does not exist, so repeating a delete is
/// harmless. Best effort only on flash and copy-on-write filesystems.
pub fn secure_delete(path: &Path, passes: u32) -> VaultResult<bool> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        return Err(VaultError::Storage(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory", path.display()),
        )));
    }

    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let len = metadata.len();
    let mut buf = vec![0u8; WIPE_BUF_SIZE];
    for _ in 0..passes {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(WIPE_BUF_SIZE as u64) as usize;
            OsRng.fill_bytes(&mut buf[..n]);
            file.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    file.set_len(0)?;
    file.sync_all()?;
    drop(file);

    // Hide the original name before unlinking.
    let scrambled = path.with_file_name(format!(".{}", Uuid::new_v4().simple()));
    fs::rename(path, &scrambled)?;
    fs::remove_file(&scrambled)?;
    sync_dir(&parent_dir(path));

    log::debug!("Securely deleted {} ({} bytes, {} passes)", path.display(), len, passes);
    Ok(true)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Persist a rename. Not every platform can fsync a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
