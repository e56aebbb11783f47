//! # Calculator Vault
//!
//! Hidden, per-file encrypted media space behind a working calculator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     CALCULATOR VAULT                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │  PASSCODE   │  │  VAULT      │  │  ASYNC SERVICE   │  │
//! │  │  (SHA-256)  │  │  FACADE     │  │  (Tokio)         │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬─────────┘  │
//! │         │                │                   │            │
//! │  ┌──────┴────────────────┴───────────────────┴─────────┐ │
//! │  │               FILE STATE COORDINATOR                 │ │
//! │  │   hide / encrypt / decrypt / unhide / copy / move    │ │
//! │  └──────┬─────────────────┬───────────────────┬────────┘ │
//! │  ┌──────┴──────┐  ┌───────┴──────┐  ┌─────────┴───────┐  │
//! │  │ FILE CIPHER │  │  REGISTRY    │  │  FOLDERS        │  │
//! │  │ AES-256-CBC │  │  (SQLite)    │  │  (.nomedia)     │  │
//! │  └──────┬──────┘  └──────────────┘  └─────────────────┘  │
//! │  ┌──────┴──────┐                                          │
//! │  │ KEY PROVIDER│                                          │
//! │  └─────────────┘                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Files encrypted with AES-256-CBC, PKCS7 padding, fresh IV per file
//! - On-disk format: `[16-byte IV][ciphertext]`, no authentication tag
//! - Key is SHA-256 of a custom passphrase, or a stored random key
//! - Passcode and security answer stored only as SHA-256 digests
//! - Key material zeroized on drop

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod file_type;
pub mod folders;
pub mod passcode;
pub mod preview;
pub mod registry;
pub mod secure_fs;
pub mod service;
pub mod vault;

#[cfg(feature = "android")]
pub mod android;

pub use config::VaultConfig;
pub use coordinator::{BatchOperation, BatchReport, BatchRequest, BatchStatus, FileStateCoordinator};
pub use crypto::{FileCipher, KeyProvider, VaultKey};
pub use error::{VaultError, VaultResult};
pub use file_type::FileType;
pub use folders::FolderManager;
pub use registry::{HiddenFileRecord, HiddenFileRegistry, SqliteRegistry};
pub use service::VaultService;
pub use vault::{CalculatorVault, VaultState};

/// Calculator Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
