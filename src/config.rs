//! Calculator Vault - Configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{de, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VaultError, VaultResult};
use crate::secure_fs::write_atomic;

/// Name of the hidden root directory inside the data directory
pub const HIDDEN_DIR: &str = ".CalculatorHide";

/// Vault configuration.
///
/// Fields missing from a stored file take their value from
/// [`VaultConfig::for_data_dir`] of the data directory being opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Root of all managed folders
    pub hidden_root: PathBuf,
    /// SQLite registry of hidden files
    pub database_path: PathBuf,
    /// Key settings (custom passphrase flag, generated key)
    pub key_store_path: PathBuf,
    /// Hashed unlock passcode and security question
    pub passcode_path: PathBuf,
    /// Short-lived decrypted previews
    pub preview_dir: PathBuf,
    /// Encrypt files while hiding them
    pub encrypt_on_hide: bool,
    /// Age after which preview files are purged
    pub preview_max_age_secs: u64,
    /// Show real names in listings; otherwise only the file type
    pub show_file_names: bool,
}

impl VaultConfig {
    /// Configuration with every path under `data_dir`
    pub fn for_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            hidden_root: data_dir.join(HIDDEN_DIR),
            database_path: data_dir.join("db").join("hidden_files.db"),
            key_store_path: data_dir.join("db").join("keystore.json"),
            passcode_path: data_dir.join("db").join("passcode.json"),
            preview_dir: data_dir.join("cache").join("previews"),
            encrypt_on_hide: false,
            preview_max_age_secs: 300,
            show_file_names: true,
        }
    }

    /// Load `path`, or write the defaults for `data_dir` there on first use
    pub fn load_or_create(path: &Path, data_dir: &Path) -> VaultResult<Self> {
        if path.exists() {
            let data = fs::read(path)?;
            return Self::merged(data_dir, &data).map_err(|e| {
                VaultError::SerializationError(format!("{}: {}", path.display(), e))
            });
        }

        let config = Self::for_data_dir(data_dir);
        config.save(path)?;
        debug!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    /// Stored fields laid over the defaults for `data_dir`
    fn merged(data_dir: &Path, data: &[u8]) -> Result<Self, serde_json::Error> {
        let Value::Object(stored) = serde_json::from_slice::<Value>(data)? else {
            return Err(de::Error::custom("expected a JSON object"));
        };

        let mut config = serde_json::to_value(Self::for_data_dir(data_dir))?;
        if let Value::Object(defaults) = &mut config {
            defaults.extend(stored);
        }
        serde_json::from_value(config)
    }

    pub fn save(&self, path: &Path) -> VaultResult<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }

    pub fn preview_max_age(&self) -> Duration {
        Duration::from_secs(self.preview_max_age_secs)
    }
}
