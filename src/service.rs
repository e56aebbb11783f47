//! Calculator Vault - Async Service
//!
//! Runs blocking vault work on Tokio's blocking pool so interactive callers
//! never wait on disk or cipher I/O.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::oneshot;

use crate::coordinator::{BatchReport, BatchRequest};
use crate::error::VaultResult;
use crate::vault::CalculatorVault;

/// Async front end over a shared [`CalculatorVault`]
#[derive(Clone)]
pub struct VaultService {
    vault: Arc<CalculatorVault>,
}

impl VaultService {
    pub fn new(vault: Arc<CalculatorVault>) -> Self {
        Self { vault }
    }

    pub fn vault(&self) -> &Arc<CalculatorVault> {
        &self.vault
    }

    /// Run a batch to completion off the async executor
    pub async fn run(&self, request: BatchRequest) -> VaultResult<BatchReport> {
        let vault = self.vault.clone();
        tokio::task::spawn_blocking(move || vault.execute(&request)).await?
    }

    /// Start a batch and hand back a receiver for its result.
    ///
    /// The batch runs to completion even if the receiver is dropped; the
    /// result is then discarded.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn submit(&self, request: BatchRequest) -> oneshot::Receiver<VaultResult<BatchReport>> {
        let (tx, rx) = oneshot::channel();
        let vault = self.vault.clone();

        tokio::task::spawn_blocking(move || {
            let operation = request.operation();
            let result = vault.execute(&request);
            if let Err(e) = &result {
                warn!("{} batch rejected: {}", operation, e);
            }
            if tx.send(result).is_err() {
                debug!("{} batch finished after its caller went away", operation);
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn service(dir: &Path) -> VaultService {
        let vault = CalculatorVault::open_in(dir).unwrap();
        vault.set_passcode("42").unwrap();
        vault.unlock("42").unwrap();
        VaultService::new(Arc::new(vault))
    }

    #[tokio::test]
    async fn test_run_batch() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let file = svc.vault().hidden_root().join("a.txt");
        fs::write(&file, b"text").unwrap();

        let report = svc
            .run(BatchRequest::Encrypt { files: vec![file.clone()] })
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(file.with_extension("enc").exists());
    }

    #[tokio::test]
    async fn test_submit_delivers_result() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let file = svc.vault().hidden_root().join("b.txt");
        fs::write(&file, b"text").unwrap();

        let rx = svc.submit(BatchRequest::Delete { files: vec![file.clone()] });
        let report = rx.await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_dropped_receiver_still_completes() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let file = svc.vault().hidden_root().join("c.txt");
        fs::write(&file, b"text").unwrap();

        drop(svc.submit(BatchRequest::Encrypt { files: vec![file.clone()] }));

        let encrypted = file.with_extension("enc");
        for _ in 0..200 {
            if encrypted.exists() && !file.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(encrypted.exists());
    }

    #[test]
    #[should_panic]
    fn test_submit_needs_runtime() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let _ = svc.submit(BatchRequest::Delete { files: vec![] });
    }

    #[tokio::test]
    async fn test_locked_vault_rejects() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        svc.vault().lock();

        let result = svc.run(BatchRequest::Delete { files: vec![] }).await;
        assert!(matches!(result, Err(VaultError::VaultLocked)));
    }
}
