//! Calculator Vault - Key Management
//!
//! Resolves the active AES-256 key either from a user passphrase (custom key)
//! or from a randomly generated key persisted in a key store.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// IV length for AES-CBC (one block)
pub const IV_LEN: usize = 16;

/// Secure key wrapper with automatic zeroization
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    /// Create a new vault key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    /// SHA-256 of the UTF-8 passphrase. Same passphrase, same key.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(Sha256::digest(passphrase.as_bytes()).into())
    }

    /// Decode a base64 key as written by [`VaultKey::to_base64`]
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let mut decoded = STANDARD.decode(encoded.trim())?;
        if decoded.len() != KEY_LEN {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(VaultError::InvalidKeyLength {
                expected: KEY_LEN,
                actual,
            });
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::new(bytes))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Generate a random IV for AES-CBC
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

// ═══════════════════════════════════════════════════════════════════════════
// KEY SETTINGS & STORES
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted key settings
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySettings {
    /// Whether the passphrase-derived key is active
    #[serde(default)]
    pub use_custom_key: bool,
    /// User passphrase for the custom key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_key: Option<String>,
    /// Base64 of the generated random key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

impl fmt::Debug for KeySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySettings")
            .field("use_custom_key", &self.use_custom_key)
            .field("custom_key", &self.custom_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Storage for [`KeySettings`]
pub trait KeyStore: Send + Sync {
    fn load(&self) -> VaultResult<KeySettings>;
    fn save(&self, settings: &KeySettings) -> VaultResult<()>;
}

/// Key store kept in memory only
#[derive(Default)]
pub struct MemoryKeyStore {
    settings: Mutex<KeySettings>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: KeySettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> VaultResult<KeySettings> {
        Ok(self.settings.lock().clone())
    }

    fn save(&self, settings: &KeySettings) -> VaultResult<()> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

/// Key store persisted as a JSON file
pub struct JsonKeyStore {
    path: PathBuf,
}

impl JsonKeyStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for JsonKeyStore {
    fn load(&self) -> VaultResult<KeySettings> {
        if !self.path.exists() {
            return Ok(KeySettings::default());
        }

        let data = fs::read(&self.path)?;
        serde_json::from_slice(&data)
            .map_err(|e| VaultError::KeyStore(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, settings: &KeySettings) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_vec_pretty(settings)?;
        let temp_path = self.path.with_extension("tmp");

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// KEY PROVIDER
// ═══════════════════════════════════════════════════════════════════════════

/// Resolves the active encryption key from a [`KeyStore`]
pub struct KeyProvider {
    store: Arc<dyn KeyStore>,
}

impl KeyProvider {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Provider over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyStore::new()))
    }

    /// Resolve the active key.
    ///
    /// Custom passphrase first, then the stored random key, then a newly
    /// generated one. An unreadable stored key is replaced silently; files
    /// encrypted under the old key can no longer be decrypted.
    pub fn resolve_key(&self) -> VaultResult<VaultKey> {
        let mut settings = self.store.load()?;

        if settings.use_custom_key {
            if let Some(passphrase) = settings.custom_key.as_deref() {
                return Ok(VaultKey::from_passphrase(passphrase));
            }
        }

        if let Some(encoded) = settings.secret_key.as_deref() {
            match VaultKey::from_base64(encoded) {
                Ok(key) => return Ok(key),
                Err(e) => warn!("Stored key unreadable ({}), generating a new one", e),
            }
        }

        let key = VaultKey::generate();
        settings.secret_key = Some(key.to_base64());
        self.store.save(&settings)?;
        debug!("Generated and stored a new random key");

        Ok(key)
    }

    /// Activate a passphrase-derived key
    pub fn set_custom_key(&self, passphrase: &str) -> VaultResult<()> {
        if passphrase.is_empty() {
            return Err(VaultError::EmptyCustomKey);
        }

        let mut settings = self.store.load()?;
        settings.custom_key = Some(passphrase.to_string());
        settings.use_custom_key = true;
        self.store.save(&settings)
    }

    /// Drop the passphrase and fall back to the generated key
    pub fn clear_custom_key(&self) -> VaultResult<()> {
        let mut settings = self.store.load()?;
        settings.custom_key = None;
        settings.use_custom_key = false;
        self.store.save(&settings)
    }

    pub fn is_using_custom_key(&self) -> VaultResult<bool> {
        Ok(self.store.load()?.use_custom_key)
    }
}
