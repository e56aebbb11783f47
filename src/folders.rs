//! Calculator Vault - Managed Folders
//!
//! Every directory under the hidden root carries a zero-length `.nomedia`
//! marker so media indexers skip it. Listings never include the marker.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::{VaultError, VaultResult};

/// Reserved marker excluded from media scanning and from every listing
pub const NOMEDIA: &str = ".nomedia";

const FORBIDDEN_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Folder names accepted for create and rename
pub fn is_valid_folder_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains(FORBIDDEN_CHARS)
        && !name.starts_with('.')
        && name.chars().count() <= 255
}

/// Scanner and maintenance for folders under the hidden root
#[derive(Debug, Clone)]
pub struct FolderManager {
    root: PathBuf,
}

impl FolderManager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The hidden root, created with its marker on first use
    pub fn hidden_root(&self) -> VaultResult<PathBuf> {
        self.ensure_managed(&self.root)?;
        Ok(self.root.clone())
    }

    /// Create `dir` if needed and make sure it carries the marker
    pub fn ensure_managed(&self, dir: &Path) -> VaultResult<()> {
        if dir.exists() && !dir.is_dir() {
            return Err(VaultError::NotADirectory(dir.display().to_string()));
        }
        fs::create_dir_all(dir)?;

        let marker = dir.join(NOMEDIA);
        if !marker.exists() {
            fs::File::create(&marker)?;
        }
        Ok(())
    }

    /// Regular files directly inside `folder`, sorted by name
    pub fn list_files(&self, folder: &Path) -> Vec<PathBuf> {
        list_entries(folder, |entry| entry.file_type().is_file())
    }

    /// Directories directly inside `folder`, sorted by name
    pub fn list_subfolders(&self, folder: &Path) -> Vec<PathBuf> {
        list_entries(folder, |entry| entry.file_type().is_dir())
    }

    /// Create `parent/name` with its marker. False if it already exists.
    pub fn create_folder(&self, parent: &Path, name: &str) -> bool {
        match self.try_create_folder(parent, name) {
            Ok(path) => {
                debug!("Created folder {}", path.display());
                true
            }
            Err(e) => {
                warn!("Could not create folder {:?} in {}: {}", name, parent.display(), e);
                false
            }
        }
    }

    pub fn try_create_folder(&self, parent: &Path, name: &str) -> VaultResult<PathBuf> {
        if !is_valid_folder_name(name) {
            return Err(VaultError::InvalidFolderName(name.to_string()));
        }

        let folder = parent.join(name);
        if folder.exists() {
            return Err(VaultError::FolderAlreadyExists(folder.display().to_string()));
        }

        self.ensure_managed(&folder)?;
        Ok(folder)
    }

    /// Delete direct child files, then the folder. False if `folder` is
    /// missing, not a directory, or any removal fails.
    pub fn delete_folder(&self, folder: &Path) -> bool {
        match self.try_delete_folder(folder) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not delete folder {}: {}", folder.display(), e);
                false
            }
        }
    }

    pub fn try_delete_folder(&self, folder: &Path) -> VaultResult<()> {
        if !folder.exists() {
            return Err(VaultError::not_found(folder));
        }
        if !folder.is_dir() {
            return Err(VaultError::NotADirectory(folder.display().to_string()));
        }

        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        fs::remove_dir(folder)?;

        Ok(())
    }

    /// Rename `folder` within its parent. False if the target exists.
    pub fn rename_folder(&self, folder: &Path, new_name: &str) -> bool {
        match self.try_rename_folder(folder, new_name) {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not rename folder {}: {}", folder.display(), e);
                false
            }
        }
    }

    pub fn try_rename_folder(&self, folder: &Path, new_name: &str) -> VaultResult<PathBuf> {
        if !is_valid_folder_name(new_name) {
            return Err(VaultError::InvalidFolderName(new_name.to_string()));
        }
        if !folder.is_dir() {
            return Err(VaultError::NotADirectory(folder.display().to_string()));
        }

        let parent = folder
            .parent()
            .ok_or_else(|| VaultError::InvalidFolderName(folder.display().to_string()))?;
        let target = parent.join(new_name);
        if target.exists() {
            return Err(VaultError::FolderAlreadyExists(target.display().to_string()));
        }

        fs::rename(folder, &target)?;
        Ok(target)
    }
}

fn list_entries(folder: &Path, keep: impl Fn(&walkdir::DirEntry) -> bool) -> Vec<PathBuf> {
    if !folder.is_dir() {
        return Vec::new();
    }

    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() != NOMEDIA && keep(entry))
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_folder_names() {
        assert!(is_valid_folder_name("Holiday 2024"));
        assert!(!is_valid_folder_name("   "));
        assert!(!is_valid_folder_name(".secret"));
        assert!(!is_valid_folder_name("a/b"));
        assert!(!is_valid_folder_name("what?"));
        assert!(!is_valid_folder_name(&"x".repeat(256)));
    }

    #[test]
    fn test_create_and_list() {
        let dir = tempdir().unwrap();
        let fm = FolderManager::new(dir.path().join(".CalculatorHide"));
        let root = fm.hidden_root().unwrap();
        assert!(root.join(NOMEDIA).exists());

        assert!(fm.create_folder(&root, "Trips"));
        assert!(fm.create_folder(&root, "Albums"));
        assert!(!fm.create_folder(&root, "Trips"));
        assert!(root.join("Trips").join(NOMEDIA).exists());

        fs::write(root.join("Trips").join("b.jpg"), b"b").unwrap();
        fs::write(root.join("Trips").join("a.jpg"), b"a").unwrap();

        assert_eq!(fm.list_subfolders(&root), vec![root.join("Albums"), root.join("Trips")]);
        assert_eq!(
            fm.list_files(&root.join("Trips")),
            vec![root.join("Trips").join("a.jpg"), root.join("Trips").join("b.jpg")]
        );
        assert!(fm.list_files(&root.join("Nope")).is_empty());
    }

    #[test]
    fn test_delete_folder() {
        let dir = tempdir().unwrap();
        let fm = FolderManager::new(dir.path());
        let folder = fm.try_create_folder(dir.path(), "Docs").unwrap();
        fs::write(folder.join("note.txt"), b"n").unwrap();

        assert!(fm.delete_folder(&folder));
        assert!(!folder.exists());
        assert!(!fm.delete_folder(&folder));

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"p").unwrap();
        assert!(!fm.delete_folder(&file));
    }

    #[test]
    fn test_delete_folder_with_subfolder_fails() {
        let dir = tempdir().unwrap();
        let fm = FolderManager::new(dir.path());
        let folder = fm.try_create_folder(dir.path(), "Outer").unwrap();
        fm.try_create_folder(&folder, "Inner").unwrap();

        assert!(!fm.delete_folder(&folder));
        assert!(folder.join("Inner").exists());
    }

    #[test]
    fn test_rename_folder() {
        let dir = tempdir().unwrap();
        let fm = FolderManager::new(dir.path());
        let a = fm.try_create_folder(dir.path(), "A").unwrap();
        fm.try_create_folder(dir.path(), "B").unwrap();

        assert!(!fm.rename_folder(&a, "B"));
        assert!(!fm.rename_folder(&a, "bad:name"));

        let renamed = fm.try_rename_folder(&a, "C").unwrap();
        assert_eq!(renamed, dir.path().join("C"));
        assert!(renamed.join(NOMEDIA).exists());
        assert!(!a.exists());
    }
}
