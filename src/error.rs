//! Calculator Vault - Error Types

use std::path::Path;

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Custom key cannot be empty")]
    EmptyCustomKey,

    // ═══════════════════════════════════════════════════════════════
    // KEY STORE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    // ═══════════════════════════════════════════════════════════════
    // REGISTRY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Registry record corrupted: {0}")]
    RecordCorrupted(String),

    #[error("Unknown file type: {0}")]
    UnknownFileType(String),

    // ═══════════════════════════════════════════════════════════════
    // FILE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Folder already exists: {0}")]
    FolderAlreadyExists(String),

    #[error("Invalid folder name: {0}")]
    InvalidFolderName(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Empty file: {0}")]
    EmptyFile(String),

    #[error("File type must be supplied to decrypt {0} (no metadata)")]
    FileTypeRequired(String),

    #[error("Copy verification failed: {0}")]
    CopyVerificationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // VAULT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Invalid passcode")]
    InvalidPasscode,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    pub(crate) fn not_found(path: &Path) -> Self {
        VaultError::FileNotFound(path.display().to_string())
    }

    /// The input of the operation did not exist
    pub fn is_missing_source(&self) -> bool {
        matches!(self, VaultError::FileNotFound(_))
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed(_)
                | VaultError::InvalidKeyLength { .. }
                | VaultError::InvalidPasscode
        )
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::TaskFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = VaultError::not_found(Path::new("/tmp/gone.jpg"));
        assert!(missing.is_missing_source());
        assert!(!missing.is_security_critical());
        assert_eq!(missing.to_string(), "File not found: /tmp/gone.jpg");

        assert!(VaultError::DecryptionFailed("bad padding".into()).is_security_critical());
    }
}
