//! Calculator Vault - File Cipher
//!
//! Whole-file AES-256-CBC with PKCS#7 padding.
//!
//! Format of an encrypted file:
//! ```text
//! [IV 16B][random, fresh per file]
//! [CIPHERTEXT variable][AES-256-CBC, PKCS#7 padded]
//! ```
//!
//! There is no authentication tag. Tampered ciphertext or a wrong key is only
//! detected when the padding fails to validate; otherwise it decrypts to garbage.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    KeyIvInit,
};
use log::{debug, warn};

use super::keys::{generate_iv, KeyProvider, IV_LEN};
use crate::error::{VaultError, VaultResult};
use crate::secure_fs::remove_quietly;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size
const BLOCK_LEN: usize = 16;

/// Read granularity (multiple of the block size)
const CHUNK_LEN: usize = 64 * 1024;

/// Encrypts and decrypts single files with the active key
pub struct FileCipher {
    keys: Arc<KeyProvider>,
}

impl FileCipher {
    pub fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyProvider> {
        &self.keys
    }

    /// Encrypt `source` into `destination`. Never leaves a partial destination.
    pub fn encrypt(&self, source: &Path, destination: &Path) -> bool {
        match self.try_encrypt(source, destination) {
            Ok(len) => {
                debug!("Encrypted {} ({} bytes)", destination.display(), len);
                true
            }
            Err(e) => {
                warn!("Encryption of {} failed: {}", source.display(), e);
                false
            }
        }
    }

    /// Decrypt `source` into `destination`. Never leaves a partial destination.
    pub fn decrypt(&self, source: &Path, destination: &Path) -> bool {
        match self.try_decrypt(source, destination) {
            Ok(len) => {
                debug!("Decrypted {} ({} bytes)", destination.display(), len);
                true
            }
            Err(e) => {
                warn!("Decryption of {} failed: {}", source.display(), e);
                false
            }
        }
    }

    /// Like [`FileCipher::encrypt`], returning the encrypted length
    pub fn try_encrypt(&self, source: &Path, destination: &Path) -> VaultResult<u64> {
        if !source.is_file() {
            return Err(VaultError::not_found(source));
        }
        if source == destination {
            return Err(VaultError::EncryptionFailed(
                "source and destination are the same file".into(),
            ));
        }

        self.write_encrypted(source, destination).map_err(|e| {
            remove_quietly(destination);
            e
        })
    }

    /// Like [`FileCipher::decrypt`], returning the plaintext length
    pub fn try_decrypt(&self, source: &Path, destination: &Path) -> VaultResult<u64> {
        if !source.is_file() {
            return Err(VaultError::not_found(source));
        }
        if fs::metadata(source)?.len() == 0 {
            return Err(VaultError::EmptyFile(source.display().to_string()));
        }
        if source == destination {
            return Err(VaultError::DecryptionFailed(
                "source and destination are the same file".into(),
            ));
        }

        self.write_decrypted(source, destination).map_err(|e| {
            remove_quietly(destination);
            e
        })
    }

    fn write_encrypted(&self, source: &Path, destination: &Path) -> VaultResult<u64> {
        let key = self.keys.resolve_key()?;
        let iv = generate_iv();
        let mut cipher = Aes256CbcEnc::new_from_slices(key.expose(), &iv)
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let mut reader = File::open(source)?;
        let mut writer = BufWriter::new(File::create(destination)?);
        writer.write_all(&iv)?;

        let mut written = IV_LEN as u64;
        let mut buf = vec![0u8; CHUNK_LEN];
        let mut carry: Vec<u8> = Vec::with_capacity(CHUNK_LEN + BLOCK_LEN);

        loop {
            let n = read_some(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            carry.extend_from_slice(&buf[..n]);

            // Full blocks go out now, the remainder waits for padding
            let full = carry.len() - carry.len() % BLOCK_LEN;
            for block in carry[..full].chunks_exact_mut(BLOCK_LEN) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            writer.write_all(&carry[..full])?;
            written += full as u64;
            carry.drain(..full);
        }

        let tail = cipher.encrypt_padded_vec_mut::<Pkcs7>(&carry);
        writer.write_all(&tail)?;
        written += tail.len() as u64;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        verify_encrypted(destination)?;
        Ok(written)
    }

    fn write_decrypted(&self, source: &Path, destination: &Path) -> VaultResult<u64> {
        let key = self.keys.resolve_key()?;

        let mut iv = [0u8; IV_LEN];
        File::open(source)?
            .read_exact(&mut iv)
            .map_err(|_| VaultError::DecryptionFailed("missing initialization vector".into()))?;

        let mut cipher = Aes256CbcDec::new_from_slices(key.expose(), &iv)
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

        let mut reader = File::open(source)?;
        reader.seek(SeekFrom::Start(IV_LEN as u64))?;
        let mut writer = BufWriter::new(File::create(destination)?);

        let mut written = 0u64;
        let mut buf = vec![0u8; CHUNK_LEN];
        let mut carry: Vec<u8> = Vec::with_capacity(CHUNK_LEN + BLOCK_LEN);

        loop {
            let n = read_some(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            carry.extend_from_slice(&buf[..n]);

            // The last block carries the padding: always hold it back
            if carry.len() > BLOCK_LEN {
                let full = ((carry.len() - 1) / BLOCK_LEN) * BLOCK_LEN;
                for block in carry[..full].chunks_exact_mut(BLOCK_LEN) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                writer.write_all(&carry[..full])?;
                written += full as u64;
                carry.drain(..full);
            }
        }

        if carry.len() != BLOCK_LEN {
            return Err(VaultError::DecryptionFailed(
                "ciphertext is not block aligned".into(),
            ));
        }

        let tail = cipher.decrypt_padded_vec_mut::<Pkcs7>(&carry).map_err(|_| {
            VaultError::DecryptionFailed("invalid padding (wrong key or corrupted file)".into())
        })?;
        writer.write_all(&tail)?;
        written += tail.len() as u64;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        if !destination.is_file() || fs::metadata(destination)?.len() == 0 {
            return Err(VaultError::DecryptionFailed(
                "decrypted output is empty".into(),
            ));
        }

        Ok(written)
    }
}

/// Post-condition of a successful encryption: non-empty, readable IV
fn verify_encrypted(path: &Path) -> VaultResult<()> {
    if !path.is_file() || fs::metadata(path)?.len() == 0 {
        return Err(VaultError::EncryptionFailed(format!(
            "{} missing or empty after encryption",
            path.display()
        )));
    }

    let mut iv = [0u8; IV_LEN];
    File::open(path)?.read_exact(&mut iv).map_err(|_| {
        VaultError::EncryptionFailed(format!("{} has no readable IV", path.display()))
    })?;

    Ok(())
}

fn read_some(reader: &mut File, buf: &mut [u8]) -> VaultResult<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{KeySettings, MemoryKeyStore};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn cipher() -> FileCipher {
        FileCipher::new(Arc::new(KeyProvider::in_memory()))
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_roundtrip_sizes() {
        let dir = tempdir().unwrap();
        let c = cipher();

        for len in [1, 15, 16, 17, 4096, CHUNK_LEN, CHUNK_LEN + 5, 3 * CHUNK_LEN + 100] {
            let data = sample(len);
            let plain = write(dir.path(), "plain.bin", &data);
            let enc = dir.path().join("plain.enc");
            let dec = dir.path().join("plain.out");

            assert!(c.encrypt(&plain, &enc), "encrypt len {}", len);
            let expected = IV_LEN + (len / BLOCK_LEN + 1) * BLOCK_LEN;
            assert_eq!(fs::metadata(&enc).unwrap().len() as usize, expected);

            assert!(c.decrypt(&enc, &dec), "decrypt len {}", len);
            assert_eq!(fs::read(&dec).unwrap(), data);
        }
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let dir = tempdir().unwrap();
        let c = cipher();
        let plain = write(dir.path(), "same.txt", b"identical plaintext in both files");

        let a = dir.path().join("a.enc");
        let b = dir.path().join("b.enc");
        assert!(c.encrypt(&plain, &a));
        assert!(c.encrypt(&plain, &b));

        let a = fs::read(a).unwrap();
        let b = fs::read(b).unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_source() {
        let dir = tempdir().unwrap();
        let c = cipher();
        let dest = dir.path().join("out.enc");

        assert!(!c.encrypt(&dir.path().join("nope.jpg"), &dest));
        assert!(!dest.exists());
        assert!(c
            .try_decrypt(&dir.path().join("nope.enc"), &dest)
            .unwrap_err()
            .is_missing_source());
    }

    #[test]
    fn test_empty_ciphertext_rejected() {
        let dir = tempdir().unwrap();
        let c = cipher();
        let empty = write(dir.path(), "empty.enc", b"");
        let dest = dir.path().join("empty.jpg");

        assert!(!c.decrypt(&empty, &dest));
        assert!(!dest.exists());
    }

    #[test]
    fn test_truncated_ciphertext_leaves_nothing() {
        let dir = tempdir().unwrap();
        let c = cipher();
        let plain = write(dir.path(), "doc.pdf", &sample(1000));
        let enc = dir.path().join("doc.enc");
        assert!(c.encrypt(&plain, &enc));

        let mut bytes = fs::read(&enc).unwrap();
        bytes.truncate(bytes.len() - 3);
        fs::write(&enc, &bytes).unwrap();

        let dest = dir.path().join("doc.out");
        assert!(!c.decrypt(&enc, &dest));
        assert!(!dest.exists());
    }

    #[test]
    fn test_iv_only_file_rejected() {
        let dir = tempdir().unwrap();
        let c = cipher();
        let enc = write(dir.path(), "short.enc", &[0u8; IV_LEN]);
        let dest = dir.path().join("short.jpg");

        assert!(!c.decrypt(&enc, &dest));
        assert!(!dest.exists());
    }

    #[test]
    fn test_wrong_key_never_yields_plaintext() {
        let dir = tempdir().unwrap();
        let data = sample(777);
        let plain = write(dir.path(), "photo.jpg", &data);

        let right = cipher();
        let enc = dir.path().join("photo.enc");
        assert!(right.encrypt(&plain, &enc));

        // Padding check rejects a wrong key except with probability ~1/256,
        // in which case the output is garbage (no MAC in this format).
        let mut rejected = 0;
        for i in 0..8 {
            let store = MemoryKeyStore::with_settings(KeySettings {
                use_custom_key: true,
                custom_key: Some(format!("wrong passphrase {}", i)),
                secret_key: None,
            });
            let wrong = FileCipher::new(Arc::new(KeyProvider::new(Arc::new(store))));
            let dest = dir.path().join(format!("attempt{}.jpg", i));

            if wrong.decrypt(&enc, &dest) {
                assert_ne!(fs::read(&dest).unwrap(), data);
            } else {
                assert!(!dest.exists());
                rejected += 1;
            }
        }
        assert!(rejected > 0);
    }

    #[test]
    fn test_same_path_is_refused() {
        let dir = tempdir().unwrap();
        let c = cipher();
        let data = b"do not clobber me".to_vec();
        let plain = write(dir.path(), "keep.txt", &data);

        assert!(!c.encrypt(&plain, &plain));
        assert_eq!(fs::read(&plain).unwrap(), data);
    }
}
