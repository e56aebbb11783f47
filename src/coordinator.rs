//! Calculator Vault - File State Coordinator
//!
//! Batch engine over the cipher and the registry. Every item runs its steps
//! in a fixed order (disk write, registry update, removal of the original)
//! and rolls back its own earlier steps when a later one fails. One item's
//! failure never stops the rest of the batch.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::FileCipher;
use crate::error::{VaultError, VaultResult};
use crate::file_type::FileType;
use crate::folders::FolderManager;
use crate::registry::{HiddenFileRecord, HiddenFileRegistry};
use crate::secure_fs::{
    absolute, change_extension, content_digest, copy_verified, extension_of, file_name_of,
    has_encrypted_extension, remove_quietly, unique_path, ENCRYPTED_EXTENSION,
};

// ═══════════════════════════════════════════════════════════════════════════
// REQUESTS & REPORTS
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of batch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    Hide,
    Encrypt,
    Decrypt,
    Unhide,
    Copy,
    Move,
    Delete,
}

impl BatchOperation {
    fn verb(&self) -> &'static str {
        match self {
            Self::Hide => "hide",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Unhide => "unhide",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Delete => "delete",
        }
    }

    fn past_participle(&self) -> &'static str {
        match self {
            Self::Hide => "hidden",
            Self::Encrypt => "encrypted",
            Self::Decrypt => "decrypted",
            Self::Unhide => "unhidden",
            Self::Copy => "copied",
            Self::Move => "moved",
            Self::Delete => "deleted",
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A batch operation over a selection of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchRequest {
    /// Import files into a managed folder, optionally encrypting them
    Hide {
        sources: Vec<PathBuf>,
        folder: PathBuf,
        #[serde(default)]
        encrypt: bool,
    },
    Encrypt {
        files: Vec<PathBuf>,
    },
    /// `assumed_type` is required for ciphertext files without a record
    Decrypt {
        files: Vec<PathBuf>,
        #[serde(default)]
        assumed_type: Option<FileType>,
    },
    /// Restore files to ordinary storage in `destination`
    Unhide {
        files: Vec<PathBuf>,
        destination: PathBuf,
    },
    Copy {
        files: Vec<PathBuf>,
        destination: PathBuf,
    },
    Move {
        files: Vec<PathBuf>,
        destination: PathBuf,
    },
    Delete {
        files: Vec<PathBuf>,
    },
}

impl BatchRequest {
    pub fn operation(&self) -> BatchOperation {
        match self {
            Self::Hide { .. } => BatchOperation::Hide,
            Self::Encrypt { .. } => BatchOperation::Encrypt,
            Self::Decrypt { .. } => BatchOperation::Decrypt,
            Self::Unhide { .. } => BatchOperation::Unhide,
            Self::Copy { .. } => BatchOperation::Copy,
            Self::Move { .. } => BatchOperation::Move,
            Self::Delete { .. } => BatchOperation::Delete,
        }
    }
}

/// Aggregate outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Empty,
    AllSucceeded,
    Partial,
    AllFailed,
}

/// Per-batch counts and the old path → new path mapping for the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Items that needed no work, e.g. encrypting an encrypted file
    pub skipped: usize,
    pub remapped: BTreeMap<PathBuf, PathBuf>,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        match (self.succeeded, self.failed) {
            (0, 0) => BatchStatus::Empty,
            (_, 0) => BatchStatus::AllSucceeded,
            (0, _) => BatchStatus::AllFailed,
            _ => BatchStatus::Partial,
        }
    }

    /// User-facing message for this report
    pub fn summary(&self, operation: BatchOperation) -> String {
        match self.status() {
            BatchStatus::Empty => format!("No files to {}", operation.verb()),
            BatchStatus::AllSucceeded => {
                format!("Files {} successfully", operation.past_participle())
            }
            BatchStatus::Partial => {
                format!("Some files could not be {}", operation.past_participle())
            }
            BatchStatus::AllFailed => format!("Failed to {} files", operation.verb()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

enum ItemOutcome {
    Remapped(PathBuf),
    Unchanged,
    Skipped,
}

// ═══════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Owns the sequencing of disk and registry writes for every hidden file.
///
/// Callers must not run two batches over overlapping files at the same time.
pub struct FileStateCoordinator {
    cipher: FileCipher,
    registry: Arc<dyn HiddenFileRegistry>,
    folders: FolderManager,
}

impl FileStateCoordinator {
    pub fn new(
        cipher: FileCipher,
        registry: Arc<dyn HiddenFileRegistry>,
        folders: FolderManager,
    ) -> Self {
        Self {
            cipher,
            registry,
            folders,
        }
    }

    pub fn cipher(&self) -> &FileCipher {
        &self.cipher
    }

    pub fn registry(&self) -> &Arc<dyn HiddenFileRegistry> {
        &self.registry
    }

    pub fn folders(&self) -> &FolderManager {
        &self.folders
    }

    /// Run any batch request
    pub fn execute(&self, request: &BatchRequest) -> BatchReport {
        match request {
            BatchRequest::Hide {
                sources,
                folder,
                encrypt,
            } => self.hide(sources, folder, *encrypt),
            BatchRequest::Encrypt { files } => self.encrypt(files),
            BatchRequest::Decrypt {
                files,
                assumed_type,
            } => self.decrypt(files, *assumed_type),
            BatchRequest::Unhide { files, destination } => self.unhide(files, destination),
            BatchRequest::Copy { files, destination } => self.copy_to(files, destination),
            BatchRequest::Move { files, destination } => self.move_to(files, destination),
            BatchRequest::Delete { files } => self.delete(files),
        }
    }

    pub fn hide(&self, sources: &[PathBuf], folder: &Path, encrypt: bool) -> BatchReport {
        let folder = match absolute(folder)
            .and_then(|folder| self.folders.ensure_managed(&folder).map(|_| folder))
        {
            Ok(folder) => folder,
            Err(e) => {
                warn!("Cannot hide into {}: {}", folder.display(), e);
                return BatchReport {
                    failed: sources.len(),
                    ..Default::default()
                };
            }
        };

        self.run_batch(BatchOperation::Hide, sources, |source| {
            self.hide_one(source, &folder, encrypt)
        })
    }

    pub fn encrypt(&self, files: &[PathBuf]) -> BatchReport {
        self.run_batch(BatchOperation::Encrypt, files, |file| self.encrypt_one(file))
    }

    pub fn decrypt(&self, files: &[PathBuf], assumed_type: Option<FileType>) -> BatchReport {
        self.run_batch(BatchOperation::Decrypt, files, |file| {
            self.decrypt_one(file, assumed_type)
        })
    }

    pub fn unhide(&self, files: &[PathBuf], destination: &Path) -> BatchReport {
        self.run_batch(BatchOperation::Unhide, files, |file| {
            self.unhide_one(file, destination)
        })
    }

    pub fn copy_to(&self, files: &[PathBuf], destination: &Path) -> BatchReport {
        self.run_batch(BatchOperation::Copy, files, |file| {
            self.copy_one(file, destination)
        })
    }

    pub fn move_to(&self, files: &[PathBuf], destination: &Path) -> BatchReport {
        self.run_batch(BatchOperation::Move, files, |file| {
            self.move_one(file, destination)
        })
    }

    pub fn delete(&self, files: &[PathBuf]) -> BatchReport {
        self.run_batch(BatchOperation::Delete, files, |file| self.delete_one(file))
    }

    fn run_batch<F>(&self, operation: BatchOperation, files: &[PathBuf], mut step: F) -> BatchReport
    where
        F: FnMut(&Path) -> VaultResult<ItemOutcome>,
    {
        let mut report = BatchReport::default();

        for file in files {
            let outcome = absolute(file).and_then(|path| {
                step(&path).map(|outcome| (path, outcome))
            });

            match outcome {
                Ok((path, ItemOutcome::Remapped(new_path))) => {
                    debug!("{}: {} -> {}", operation, path.display(), new_path.display());
                    report.succeeded += 1;
                    report.remapped.insert(path, new_path);
                }
                Ok((_, ItemOutcome::Unchanged)) => report.succeeded += 1,
                Ok((path, ItemOutcome::Skipped)) => {
                    debug!("{}: nothing to do for {}", operation, path.display());
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("{} failed for {}: {}", operation, file.display(), e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "{} ({} ok, {} failed, {} skipped)",
            report.summary(operation),
            report.succeeded,
            report.failed,
            report.skipped
        );
        report
    }

    // ───────────────────────────────────────────────────────────────────────
    // Per-item steps
    // ───────────────────────────────────────────────────────────────────────

    fn hide_one(&self, source: &Path, folder: &Path, encrypt: bool) -> VaultResult<ItemOutcome> {
        if !source.is_file() {
            return Err(VaultError::not_found(source));
        }
        if fs::metadata(source)?.len() == 0 {
            return Err(VaultError::EmptyFile(source.display().to_string()));
        }

        let file_name = file_name_of(source)?;
        let original_extension = extension_of(source);
        let file_type = FileType::of_path(source);

        let hidden = unique_path(&folder.join(&file_name));
        copy_verified(source, &hidden)?;

        let stored = if encrypt {
            let target = unique_path(&change_extension(&hidden, ENCRYPTED_EXTENSION));
            let encrypted = self.cipher.try_encrypt(&hidden, &target);
            let plain_removed = remove_quietly(&hidden);
            encrypted?;
            if !plain_removed {
                remove_quietly(&target);
                return Err(VaultError::EncryptionFailed(format!(
                    "plaintext copy {} could not be removed",
                    hidden.display()
                )));
            }
            target
        } else {
            hidden
        };

        let encrypted_file_name = file_name_of(&change_extension(&stored, ENCRYPTED_EXTENSION))?;
        let record = HiddenFileRecord::new(
            stored.clone(),
            file_name,
            encrypted_file_name,
            file_type,
            original_extension,
            encrypt,
        );
        if let Err(e) = self.registry.insert(&record) {
            remove_quietly(&stored);
            return Err(e);
        }

        if let Err(e) = fs::remove_file(source) {
            self.restore_record(&stored, None);
            remove_quietly(&stored);
            return Err(e.into());
        }

        Ok(ItemOutcome::Remapped(stored))
    }

    fn encrypt_one(&self, path: &Path) -> VaultResult<ItemOutcome> {
        if !path.is_file() {
            return Err(VaultError::not_found(path));
        }

        let existing = self.registry.get_by_path(path)?;
        match &existing {
            Some(record) if record.is_encrypted => return Ok(ItemOutcome::Skipped),
            None if has_encrypted_extension(path) => return Ok(ItemOutcome::Skipped),
            _ => {}
        }

        let target = unique_path(&change_extension(path, ENCRYPTED_EXTENSION));
        let encrypted_file_name = file_name_of(&target)?;
        self.cipher.try_encrypt(path, &target)?;

        let registered = match &existing {
            Some(_) => self
                .registry
                .update_encryption_status(path, &target, &encrypted_file_name, true)
                .map(|_| ()),
            None => file_name_of(path).and_then(|file_name| {
                self.registry.insert(&HiddenFileRecord::new(
                    target.clone(),
                    file_name,
                    encrypted_file_name,
                    FileType::of_path(path),
                    extension_of(path),
                    true,
                ))
            }),
        };
        if let Err(e) = registered {
            remove_quietly(&target);
            return Err(e);
        }

        if let Err(e) = fs::remove_file(path) {
            self.restore_record(&target, existing.as_ref());
            remove_quietly(&target);
            return Err(e.into());
        }

        Ok(ItemOutcome::Remapped(target))
    }

    fn decrypt_one(&self, path: &Path, assumed_type: Option<FileType>) -> VaultResult<ItemOutcome> {
        if !path.is_file() {
            return Err(VaultError::not_found(path));
        }

        let existing = self.registry.get_by_path(path)?;
        let (extension, file_type) = match &existing {
            Some(record) if record.is_encrypted => {
                (record.original_extension.clone(), record.file_type)
            }
            Some(_) => return Ok(ItemOutcome::Skipped),
            None if has_encrypted_extension(path) => {
                let file_type = assumed_type
                    .ok_or_else(|| VaultError::FileTypeRequired(path.display().to_string()))?;
                (file_type.default_extension().to_string(), file_type)
            }
            None => return Ok(ItemOutcome::Skipped),
        };

        let target = unique_path(&change_extension(path, &extension));
        let encrypted_file_name = file_name_of(path)?;
        self.cipher.try_decrypt(path, &target)?;

        let registered = match &existing {
            Some(_) => self
                .registry
                .update_encryption_status(path, &target, &encrypted_file_name, false)
                .map(|_| ()),
            None => file_name_of(&target).and_then(|file_name| {
                self.registry.insert(&HiddenFileRecord::new(
                    target.clone(),
                    file_name,
                    encrypted_file_name,
                    file_type,
                    extension,
                    false,
                ))
            }),
        };
        if let Err(e) = registered {
            remove_quietly(&target);
            return Err(e);
        }

        if let Err(e) = fs::remove_file(path) {
            self.restore_record(&target, existing.as_ref());
            remove_quietly(&target);
            return Err(e.into());
        }

        Ok(ItemOutcome::Remapped(target))
    }

    fn unhide_one(&self, path: &Path, destination_dir: &Path) -> VaultResult<ItemOutcome> {
        if !path.is_file() {
            return Err(VaultError::not_found(path));
        }

        let destination_dir = absolute(destination_dir)?;
        fs::create_dir_all(&destination_dir)?;

        let record = self.registry.get_by_path(path)?;
        match record.as_ref().filter(|r| r.is_encrypted) {
            Some(encrypted) => {
                let destination = unique_path(&destination_dir.join(&encrypted.file_name));
                let temp = unique_path(&path.with_file_name(format!(
                    ".unhide_{}{}",
                    Uuid::new_v4().simple(),
                    encrypted.original_extension
                )));

                self.cipher.try_decrypt(path, &temp)?;
                let result = self.export(path, &temp, &destination, record.as_ref());
                remove_quietly(&temp);
                result
            }
            None => {
                let destination = unique_path(&destination_dir.join(file_name_of(path)?));
                self.export(path, path, &destination, record.as_ref())
            }
        }
    }

    /// Copy `plaintext` out to `destination`, then retire `original` and its
    /// record. Nothing is retired until the copy matches the plaintext.
    fn export(
        &self,
        original: &Path,
        plaintext: &Path,
        destination: &Path,
        record: Option<&HiddenFileRecord>,
    ) -> VaultResult<ItemOutcome> {
        let content_id = content_digest(plaintext)?;
        copy_verified(plaintext, destination)?;

        match content_digest(destination) {
            Ok(copied) if copied == content_id => {}
            Ok(_) => {
                remove_quietly(destination);
                return Err(VaultError::CopyVerificationFailed(
                    destination.display().to_string(),
                ));
            }
            Err(e) => {
                remove_quietly(destination);
                return Err(e);
            }
        }

        if let Some(record) = record {
            if let Err(e) = self.registry.delete(record) {
                remove_quietly(destination);
                return Err(e);
            }
        }

        if let Err(e) = fs::remove_file(original) {
            if let Some(record) = record {
                self.reinsert(record);
            }
            remove_quietly(destination);
            return Err(e.into());
        }

        Ok(ItemOutcome::Remapped(destination.to_path_buf()))
    }

    fn copy_one(&self, path: &Path, destination_dir: &Path) -> VaultResult<ItemOutcome> {
        if !path.is_file() {
            return Err(VaultError::not_found(path));
        }

        let destination_dir = absolute(destination_dir)?;
        self.folders.ensure_managed(&destination_dir)?;

        let record = self.registry.get_by_path(path)?;
        let target = unique_path(&destination_dir.join(file_name_of(path)?));
        copy_verified(path, &target)?;

        if let Some(record) = record {
            let copied = record
                .duplicate_at(target.clone())
                .stored_as(&target)
                .and_then(|copied| self.registry.insert(&copied));
            if let Err(e) = copied {
                remove_quietly(&target);
                return Err(e);
            }
        }

        Ok(ItemOutcome::Remapped(target))
    }

    fn move_one(&self, path: &Path, destination_dir: &Path) -> VaultResult<ItemOutcome> {
        if !path.is_file() {
            return Err(VaultError::not_found(path));
        }

        let destination_dir = absolute(destination_dir)?;
        if path.parent() == Some(destination_dir.as_path()) {
            return Ok(ItemOutcome::Skipped);
        }
        self.folders.ensure_managed(&destination_dir)?;

        let record = self.registry.get_by_path(path)?;
        let target = unique_path(&destination_dir.join(file_name_of(path)?));
        copy_verified(path, &target)?;

        if let Some(record) = &record {
            let rekeyed = record.clone().stored_as(&target).and_then(|moved| {
                self.registry.update_encryption_status(
                    path,
                    &target,
                    &moved.encrypted_file_name,
                    moved.is_encrypted,
                )
            });
            if let Err(e) = rekeyed {
                remove_quietly(&target);
                return Err(e);
            }
        }

        if let Err(e) = fs::remove_file(path) {
            self.restore_record(&target, record.as_ref());
            remove_quietly(&target);
            return Err(e.into());
        }

        Ok(ItemOutcome::Remapped(target))
    }

    fn delete_one(&self, path: &Path) -> VaultResult<ItemOutcome> {
        let record = self.registry.get_by_path(path)?;
        if record.is_none() && !path.is_file() {
            return Err(VaultError::not_found(path));
        }

        if let Some(record) = &record {
            self.registry.delete(record)?;
        }

        match fs::remove_file(path) {
            Ok(()) => Ok(ItemOutcome::Unchanged),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Dropped stale record for {}", path.display());
                Ok(ItemOutcome::Unchanged)
            }
            Err(e) => {
                if let Some(record) = &record {
                    self.reinsert(record);
                }
                Err(e.into())
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Single-target operations
    // ───────────────────────────────────────────────────────────────────────

    /// Rename one file in place. The record follows the file; its type is kept.
    pub fn rename_file(&self, path: &Path, new_name: &str) -> VaultResult<PathBuf> {
        if new_name.trim().is_empty()
            || new_name.contains(['/', '\\'])
            || new_name == "."
            || new_name == ".."
        {
            return Err(VaultError::InvalidFileName(new_name.to_string()));
        }

        let path = absolute(path)?;
        if !path.is_file() {
            return Err(VaultError::not_found(&path));
        }
        let target = path.with_file_name(new_name);
        if target.exists() {
            return Err(VaultError::InvalidFileName(format!(
                "{} already exists",
                target.display()
            )));
        }

        let record = self.registry.get_by_path(&path)?;
        fs::rename(&path, &target)?;

        if let Some(record) = record {
            let mut renamed = record.duplicate_at(target.clone());
            renamed.date_added = record.date_added;
            if record.is_encrypted {
                renamed.encrypted_file_name = new_name.to_string();
                renamed.file_name =
                    file_name_of(&change_extension(&target, &record.original_extension))?;
            } else {
                renamed.file_name = new_name.to_string();
                renamed.original_extension = extension_of(&target);
                renamed.encrypted_file_name =
                    file_name_of(&change_extension(&target, ENCRYPTED_EXTENSION))?;
            }

            if let Err(e) = self.registry.rekey(&path, &renamed) {
                if let Err(undo) = fs::rename(&target, &path) {
                    error!(
                        "Could not undo rename of {} after registry failure: {}",
                        path.display(),
                        undo
                    );
                }
                return Err(e);
            }
        }

        debug!("Renamed {} -> {}", path.display(), target.display());
        Ok(target)
    }

    /// Rename a managed folder and rekey the records of every file below it
    pub fn rename_folder(&self, folder: &Path, new_name: &str) -> VaultResult<PathBuf> {
        let folder = absolute(folder)?;
        let target = self.folders.try_rename_folder(&folder, new_name)?;

        let mut rekeyed: Vec<(PathBuf, HiddenFileRecord)> = Vec::new();
        let result = self.records_under(&folder).and_then(|records| {
            for record in records {
                let relative = record
                    .file_path
                    .strip_prefix(&folder)
                    .map(Path::to_path_buf)
                    .map_err(|_| VaultError::RecordCorrupted(record.file_path.display().to_string()))?;
                let mut moved = record.clone();
                moved.file_path = target.join(relative);

                self.registry.rekey(&record.file_path, &moved)?;
                rekeyed.push((moved.file_path.clone(), record));
            }
            Ok(())
        });

        if let Err(e) = result {
            for (current, original) in rekeyed.iter().rev() {
                self.restore_record(current, Some(original));
            }
            if let Err(undo) = fs::rename(&target, &folder) {
                error!("Could not undo folder rename {}: {}", folder.display(), undo);
            }
            return Err(e);
        }

        info!("Renamed folder {} -> {} ({} records)", folder.display(), target.display(), rekeyed.len());
        Ok(target)
    }

    /// Delete a managed folder and the records of files that went with it
    pub fn delete_folder(&self, folder: &Path) -> VaultResult<()> {
        let folder = absolute(folder)?;
        let records = self.records_under(&folder)?;

        let result = self.folders.try_delete_folder(&folder);

        for record in records.iter().filter(|r| !r.file_path.exists()) {
            if let Err(e) = self.registry.delete(record) {
                error!("Record for deleted {} remains: {}", record.file_path.display(), e);
            }
        }

        result
    }

    fn records_under(&self, folder: &Path) -> VaultResult<Vec<HiddenFileRecord>> {
        Ok(self
            .registry
            .list_all()?
            .into_iter()
            .filter(|r| r.file_path.starts_with(folder))
            .collect())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Rollback
    // ───────────────────────────────────────────────────────────────────────

    /// Put the registry back to `previous` after the record moved to `current`
    fn restore_record(&self, current: &Path, previous: Option<&HiddenFileRecord>) {
        let result = match previous {
            Some(record) => self.registry.rekey(current, record),
            None => self
                .registry
                .get_by_path(current)
                .and_then(|record| match record {
                    Some(record) => self.registry.delete(&record),
                    None => Ok(()),
                }),
        };

        match result {
            Ok(()) => debug!("Rolled back record at {}", current.display()),
            Err(e) => error!("Registry rollback failed for {}: {}", current.display(), e),
        }
    }

    fn reinsert(&self, record: &HiddenFileRecord) {
        if let Err(e) = self.registry.insert(record) {
            error!("Could not restore record for {}: {}", record.file_path.display(), e);
        }
    }
}
