//! Calculator Vault - Cryptographic Core
//!
//! AES-256-CBC file encryption with a passphrase-derived or generated key.

pub mod cipher;
pub mod keys;

pub use cipher::*;
pub use keys::*;
