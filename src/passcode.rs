//! Calculator Vault - Unlock Passcode
//!
//! The passcode typed into the calculator and the optional security answer
//! are stored only as SHA-256 hex digests.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};
use crate::secure_fs::write_atomic;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PasscodeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passcode_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    security_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    security_answer_hash: Option<String>,
}

/// Passcode and security question persisted as JSON
pub struct PasscodeStore {
    path: PathBuf,
    state: Mutex<PasscodeState>,
}

impl PasscodeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data).map_err(|e| {
                VaultError::SerializationError(format!("{}: {}", path.display(), e))
            })?
        } else {
            PasscodeState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn has_passcode(&self) -> bool {
        self.state
            .lock()
            .passcode_hash
            .as_deref()
            .map_or(false, |h| !h.is_empty())
    }

    pub fn set_passcode(&self, passcode: &str) -> VaultResult<()> {
        if passcode.is_empty() {
            return Err(VaultError::InvalidPasscode);
        }

        let mut state = self.state.lock();
        state.passcode_hash = Some(digest_hex(passcode));
        self.persist(&state)
    }

    pub fn validate(&self, passcode: &str) -> bool {
        match self.state.lock().passcode_hash.as_deref() {
            Some(stored) if !stored.is_empty() => stored == digest_hex(passcode),
            _ => false,
        }
    }

    /// Forget the passcode and the security question
    pub fn reset(&self) -> VaultResult<()> {
        let mut state = self.state.lock();
        *state = PasscodeState::default();
        self.persist(&state)
    }

    pub fn set_security_question(&self, question: &str, answer: &str) -> VaultResult<()> {
        let mut state = self.state.lock();
        state.security_question = Some(question.to_string());
        state.security_answer_hash = Some(digest_hex(answer));
        self.persist(&state)
    }

    pub fn security_question(&self) -> Option<String> {
        self.state.lock().security_question.clone()
    }

    pub fn validate_security_answer(&self, answer: &str) -> bool {
        match self.state.lock().security_answer_hash.as_deref() {
            Some(stored) => stored == digest_hex(answer),
            None => false,
        }
    }

    fn persist(&self, state: &PasscodeState) -> VaultResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(state)?)
    }
}

fn digest_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
