//! Calculator Vault - Vault Facade
//!
//! Wires configuration, keys, registry, coordinator, previews and passcode
//! together. Every file operation requires the vault to be unlocked.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::VaultConfig;
use crate::coordinator::{BatchReport, BatchRequest, FileStateCoordinator};
use crate::crypto::{FileCipher, JsonKeyStore, KeyProvider};
use crate::error::{VaultError, VaultResult};
use crate::folders::FolderManager;
use crate::passcode::PasscodeStore;
use crate::preview::PreviewCache;
use crate::registry::{HiddenFileRecord, HiddenFileRegistry, SqliteRegistry};

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Vault state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Unlocked,
}

/// Calculator Vault - Main entry point
pub struct CalculatorVault {
    config: VaultConfig,
    keys: Arc<KeyProvider>,
    coordinator: FileStateCoordinator,
    previews: PreviewCache,
    passcode: PasscodeStore,
    state: RwLock<VaultState>,
}

impl CalculatorVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the vault whose data lives in `data_dir`, creating it on first use
    pub fn open_in<P: AsRef<Path>>(data_dir: P) -> VaultResult<Self> {
        let data_dir = data_dir.as_ref();
        let config = VaultConfig::load_or_create(&data_dir.join(CONFIG_FILE), data_dir)?;
        Self::open(config)
    }

    /// Open a vault from an explicit configuration. The vault starts locked.
    pub fn open(config: VaultConfig) -> VaultResult<Self> {
        let folders = FolderManager::new(&config.hidden_root);
        folders.hidden_root()?;

        let registry: Arc<dyn HiddenFileRegistry> =
            Arc::new(SqliteRegistry::open(&config.database_path)?);
        let keys = Arc::new(KeyProvider::new(Arc::new(JsonKeyStore::new(
            &config.key_store_path,
        ))));
        let cipher = FileCipher::new(keys.clone());
        let coordinator = FileStateCoordinator::new(cipher, registry, folders);

        let previews = PreviewCache::new(&config.preview_dir, config.preview_max_age());
        let passcode = PasscodeStore::open(&config.passcode_path)?;

        info!("Opened vault at {}", config.hidden_root.display());

        Ok(Self {
            config,
            keys,
            coordinator,
            previews,
            passcode,
            state: RwLock::new(VaultState::Locked),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNLOCK / LOCK
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether a passcode has been chosen yet
    pub fn is_set_up(&self) -> bool {
        self.passcode.has_passcode()
    }

    /// Choose the passcode. Changing an existing one requires the vault to be unlocked.
    pub fn set_passcode(&self, passcode: &str) -> VaultResult<()> {
        if self.passcode.has_passcode() {
            self.ensure_unlocked()?;
        }
        self.passcode.set_passcode(passcode)
    }

    pub fn set_security_question(&self, question: &str, answer: &str) -> VaultResult<()> {
        self.ensure_unlocked()?;
        self.passcode.set_security_question(question, answer)
    }

    pub fn security_question(&self) -> Option<String> {
        self.passcode.security_question()
    }

    /// Unlock with the passcode typed into the calculator
    pub fn unlock(&self, passcode: &str) -> VaultResult<()> {
        if !self.passcode.validate(passcode) {
            warn!("Rejected unlock attempt");
            return Err(VaultError::InvalidPasscode);
        }

        *self.state.write() = VaultState::Unlocked;
        info!("Vault unlocked");
        Ok(())
    }

    /// Replace a forgotten passcode after answering the security question
    pub fn recover_passcode(&self, answer: &str, new_passcode: &str) -> VaultResult<()> {
        if !self.passcode.validate_security_answer(answer) {
            return Err(VaultError::InvalidPasscode);
        }
        self.passcode.set_passcode(new_passcode)
    }

    /// Lock the vault and drop any plaintext previews
    pub fn lock(&self) {
        *self.state.write() = VaultState::Locked;
        let removed = self.previews.clear();
        info!("Vault locked ({} previews removed)", removed);
    }

    pub fn state(&self) -> VaultState {
        *self.state.read()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == VaultState::Unlocked
    }

    fn ensure_unlocked(&self) -> VaultResult<()> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(VaultError::VaultLocked)
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FILE OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Run a batch over hidden files
    pub fn execute(&self, request: &BatchRequest) -> VaultResult<BatchReport> {
        self.ensure_unlocked()?;
        Ok(self.coordinator.execute(request))
    }

    /// Hide files into `folder`, encrypting them if configured to
    pub fn hide(&self, sources: &[PathBuf], folder: &Path) -> VaultResult<BatchReport> {
        self.execute(&BatchRequest::Hide {
            sources: sources.to_vec(),
            folder: folder.to_path_buf(),
            encrypt: self.config.encrypt_on_hide,
        })
    }

    pub fn rename_file(&self, path: &Path, new_name: &str) -> VaultResult<PathBuf> {
        self.ensure_unlocked()?;
        self.coordinator.rename_file(path, new_name)
    }

    /// Decrypted view of a hidden file
    pub fn open_preview(&self, path: &Path) -> VaultResult<PathBuf> {
        self.ensure_unlocked()?;
        let path = crate::secure_fs::absolute(path)?;
        let record = self
            .coordinator
            .registry()
            .get_by_path(&path)?
            .ok_or_else(|| VaultError::not_found(&path))?;
        self.previews.open_preview(self.coordinator.cipher(), &record)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FOLDERS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn hidden_root(&self) -> &Path {
        self.coordinator.folders().root()
    }

    /// Create a managed folder under `parent` (the hidden root when `None`)
    pub fn create_folder(&self, parent: Option<&Path>, name: &str) -> VaultResult<PathBuf> {
        self.ensure_unlocked()?;
        let parent = parent.unwrap_or_else(|| self.hidden_root());
        self.coordinator.folders().try_create_folder(parent, name)
    }

    pub fn rename_folder(&self, folder: &Path, new_name: &str) -> VaultResult<PathBuf> {
        self.ensure_unlocked()?;
        self.coordinator.rename_folder(folder, new_name)
    }

    pub fn delete_folder(&self, folder: &Path) -> VaultResult<()> {
        self.ensure_unlocked()?;
        self.coordinator.delete_folder(folder)
    }

    pub fn list_files(&self, folder: &Path) -> VaultResult<Vec<PathBuf>> {
        self.ensure_unlocked()?;
        Ok(self.coordinator.folders().list_files(folder))
    }

    pub fn list_subfolders(&self, folder: &Path) -> VaultResult<Vec<PathBuf>> {
        self.ensure_unlocked()?;
        Ok(self.coordinator.folders().list_subfolders(folder))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECORDS & KEYS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn records(&self) -> VaultResult<Vec<HiddenFileRecord>> {
        self.ensure_unlocked()?;
        self.coordinator.registry().list_all()
    }

    pub fn record(&self, path: &Path) -> VaultResult<Option<HiddenFileRecord>> {
        self.ensure_unlocked()?;
        self.coordinator
            .registry()
            .get_by_path(&crate::secure_fs::absolute(path)?)
    }

    /// Live listing of all records
    pub fn subscribe(&self) -> VaultResult<watch::Receiver<Vec<HiddenFileRecord>>> {
        self.ensure_unlocked()?;
        Ok(self.coordinator.registry().subscribe())
    }

    /// Switch to a passphrase-derived key. Files encrypted under the
    /// previous key need that key to decrypt.
    pub fn set_custom_key(&self, passphrase: &str) -> VaultResult<()> {
        self.ensure_unlocked()?;
        self.keys.set_custom_key(passphrase)
    }

    pub fn clear_custom_key(&self) -> VaultResult<()> {
        self.ensure_unlocked()?;
        self.keys.clear_custom_key()
    }

    pub fn is_using_custom_key(&self) -> VaultResult<bool> {
        self.keys.is_using_custom_key()
    }
}
