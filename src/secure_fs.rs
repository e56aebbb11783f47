//! Calculator Vault - Filesystem Helpers
//!
//! Path naming rules, atomic writes, verified copies and content digests.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::warn;
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

/// Suffix of every ciphertext file
pub const ENCRYPTED_EXTENSION: &str = ".enc";

/// Replace the extension of `path`. `extension` may carry a leading dot;
/// an empty extension strips it.
pub fn change_extension(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension.trim_start_matches('.'))
}

/// Lowercase extension with its leading dot, or "" when there is none
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn file_name_of(path: &Path) -> VaultResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| VaultError::InvalidFileName(path.display().to_string()))
}

pub fn has_encrypted_extension(path: &Path) -> bool {
    extension_of(path) == ENCRYPTED_EXTENSION
}

/// `candidate` itself if free, otherwise the first free `stem_N.ext`
pub fn unique_path(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let next = candidate.with_file_name(format!("{}_{}{}", stem, n, ext));
        if !next.exists() {
            return next;
        }
        n += 1;
    }
}

/// Absolute form of `path` without touching the filesystem
pub fn absolute(path: &Path) -> VaultResult<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// Write `data` to `path` through a temp file and rename
pub fn write_atomic(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;

    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Copy `source` to `destination` and confirm the copy is complete.
/// A failed copy never leaves `destination` behind.
pub fn copy_verified(source: &Path, destination: &Path) -> VaultResult<u64> {
    if !source.is_file() {
        return Err(VaultError::not_found(source));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let result = fs::copy(source, destination)
        .map_err(VaultError::from)
        .and_then(|copied| {
            let expected = fs::metadata(source)?.len();
            let actual = fs::metadata(destination)?.len();
            if copied != expected || actual != expected {
                return Err(VaultError::CopyVerificationFailed(format!(
                    "{}: {} of {} bytes",
                    destination.display(),
                    actual,
                    expected
                )));
            }
            Ok(actual)
        });

    if result.is_err() {
        remove_quietly(destination);
    }
    result
}

/// SHA-256 of the file contents, hex encoded
pub fn content_digest(path: &Path) -> VaultResult<String> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VaultError::not_found(path),
        _ => VaultError::from(e),
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Remove a file, treating "already gone" as success
pub fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Could not remove {}: {}", path.display(), e);
            false
        }
    }
}
