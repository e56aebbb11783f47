//! Calculator Vault - Decrypted Previews
//!
//! Encrypted files are viewed through short-lived plaintext copies in a
//! private cache directory. Copies older than the configured age are purged
//! whenever a new preview is opened.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use log::{debug, warn};

use crate::crypto::FileCipher;
use crate::error::{VaultError, VaultResult};
use crate::registry::HiddenFileRecord;
use crate::secure_fs::remove_quietly;

const PREVIEW_PREFIX: &str = "preview_";

pub struct PreviewCache {
    dir: PathBuf,
    max_age: Duration,
}

impl PreviewCache {
    pub fn new<P: AsRef<Path>>(dir: P, max_age: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_age,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to view `record` through. Plain files are viewed in place;
    /// encrypted ones are decrypted to `preview_<millis>_<fileName>`.
    pub fn open_preview(&self, cipher: &FileCipher, record: &HiddenFileRecord) -> VaultResult<PathBuf> {
        if !record.file_path.is_file() {
            return Err(VaultError::not_found(&record.file_path));
        }
        if !record.is_encrypted {
            return Ok(record.file_path.clone());
        }

        fs::create_dir_all(&self.dir)?;
        self.purge_stale();

        let preview = self.dir.join(format!(
            "{}{}_{}",
            PREVIEW_PREFIX,
            Utc::now().timestamp_millis(),
            record.file_name
        ));
        cipher.try_decrypt(&record.file_path, &preview)?;

        debug!("Opened preview of {}", record.file_path.display());
        Ok(preview)
    }

    /// Remove previews older than the maximum age. Returns how many went.
    pub fn purge_stale(&self) -> usize {
        let now = SystemTime::now();
        self.remove_where(|modified| {
            now.duration_since(modified)
                .map_or(false, |age| age > self.max_age)
        })
    }

    /// Remove every preview
    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, stale: impl Fn(SystemTime) -> bool) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let is_preview = entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.starts_with(PREVIEW_PREFIX));
            if !is_preview {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Cannot stat preview {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if stale(modified) && remove_quietly(&entry.path()) {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyProvider;
    use crate::file_type::FileType;
    use std::fs::File;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_preview_decrypts_and_purges() {
        let dir = tempdir().unwrap();
        let cipher = FileCipher::new(Arc::new(KeyProvider::in_memory()));
        let cache = PreviewCache::new(dir.path().join("previews"), Duration::from_secs(300));

        let plain = dir.path().join("cat.png");
        let encrypted = dir.path().join("cat.enc");
        fs::write(&plain, b"meow").unwrap();
        assert!(cipher.encrypt(&plain, &encrypted));

        let record = HiddenFileRecord::new(encrypted, "cat.png", "cat.enc", FileType::Image, ".png", true);

        fs::create_dir_all(cache.dir()).unwrap();
        let old = cache.dir().join("preview_1_old.png");
        fs::write(&old, b"old").unwrap();
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();

        let preview = cache.open_preview(&cipher, &record).unwrap();
        assert!(!old.exists());
        assert_eq!(fs::read(&preview).unwrap(), b"meow");
        let name = preview.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("preview_") && name.ends_with("_cat.png"));

        assert_eq!(cache.purge_stale(), 0);
        assert_eq!(cache.clear(), 1);
    }

    #[test]
    fn test_plain_record_previews_in_place() {
        let dir = tempdir().unwrap();
        let cipher = FileCipher::new(Arc::new(KeyProvider::in_memory()));
        let cache = PreviewCache::new(dir.path().join("previews"), Duration::from_secs(300));

        let plain = dir.path().join("a.txt");
        fs::write(&plain, b"a").unwrap();
        let record = HiddenFileRecord::new(plain.clone(), "a.txt", "a.enc", FileType::Document, ".txt", false);

        assert_eq!(cache.open_preview(&cipher, &record).unwrap(), plain);
        assert!(!cache.dir().exists());
    }
}
