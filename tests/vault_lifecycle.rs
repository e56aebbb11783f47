//! End-to-end lifecycle of hidden files through the public API.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use calc_vault::crypto::{KeySettings, KeyStore, MemoryKeyStore};
use calc_vault::{
    BatchRequest, BatchStatus, FileCipher, FileStateCoordinator, FileType, FolderManager,
    HiddenFileRegistry, KeyProvider, SqliteRegistry,
};
use tempfile::{tempdir, TempDir};

struct Harness {
    dir: TempDir,
    registry: Arc<SqliteRegistry>,
    keys: Arc<MemoryKeyStore>,
    coordinator: FileStateCoordinator,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SqliteRegistry::open(dir.path().join("db").join("hidden.db")).unwrap());
        let keys = Arc::new(MemoryKeyStore::new());
        let cipher = FileCipher::new(Arc::new(KeyProvider::new(keys.clone())));
        let folders = FolderManager::new(dir.path().join(".CalculatorHide"));
        folders.hidden_root().unwrap();

        let coordinator = FileStateCoordinator::new(cipher, registry.clone(), folders);
        Self {
            dir,
            registry,
            keys,
            coordinator,
        }
    }

    fn public(&self) -> PathBuf {
        let p = self.dir.path().join("Pictures");
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn managed(&self, name: &str) -> PathBuf {
        self.dir.path().join(".CalculatorHide").join(name)
    }

    fn hide(&self, source: &Path, folder: &Path) -> PathBuf {
        let report = self.coordinator.execute(&BatchRequest::Hide {
            sources: vec![source.to_path_buf()],
            folder: folder.to_path_buf(),
            encrypt: false,
        });
        assert_eq!(report.status(), BatchStatus::AllSucceeded);
        report.remapped[source].clone()
    }
}

fn jpeg_bytes() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend((0..10_000u32).map(|i| (i * 31 % 251) as u8));
    bytes
}

#[test]
fn hide_then_encrypt_photo() {
    let h = Harness::new();
    let source = h.public().join("photo.jpg");
    fs::write(&source, jpeg_bytes()).unwrap();

    let hidden = h.hide(&source, &h.managed("Camera"));
    let report = h.coordinator.execute(&BatchRequest::Encrypt { files: vec![hidden.clone()] });
    assert_eq!(report.succeeded, 1);

    let encrypted = h.managed("Camera").join("photo.enc");
    assert_eq!(report.remapped[&hidden], encrypted);
    assert!(!hidden.exists());

    let padded = (jpeg_bytes().len() / 16 + 1) * 16;
    assert_eq!(fs::metadata(&encrypted).unwrap().len() as usize, 16 + padded);

    let record = h.registry.get_by_path(&encrypted).unwrap().unwrap();
    assert_eq!(record.file_name, "photo.jpg");
    assert_eq!(record.original_extension, ".jpg");
    assert!(record.is_encrypted);
    assert_eq!(record.file_type, FileType::Image);
}

#[test]
fn decrypt_restores_original_bytes() {
    let h = Harness::new();
    let source = h.public().join("photo.jpg");
    fs::write(&source, jpeg_bytes()).unwrap();
    let hidden = h.hide(&source, &h.managed("Camera"));
    let encrypted = h.coordinator.encrypt(&[hidden.clone()]).remapped[&hidden].clone();

    let report = h.coordinator.decrypt(&[encrypted.clone()], None);
    assert_eq!(report.succeeded, 1);
    assert!(!encrypted.exists());

    let restored = report.remapped[&encrypted].clone();
    assert_eq!(restored.extension().unwrap(), "jpg");
    assert_eq!(fs::read(&restored).unwrap(), jpeg_bytes());

    let record = h.registry.get_by_path(&restored).unwrap().unwrap();
    assert!(!record.is_encrypted);
    assert_eq!(record.file_path, restored);
    assert!(h.registry.get_by_path(&encrypted).unwrap().is_none());
}

#[test]
fn move_encrypted_file_between_folders() {
    let h = Harness::new();
    let source = h.public().join("clip.mp4");
    fs::write(&source, vec![7u8; 3000]).unwrap();
    let hidden = h.hide(&source, &h.managed("A"));
    let encrypted = h.coordinator.encrypt(&[hidden.clone()]).remapped[&hidden].clone();

    let report = h.coordinator.execute(&BatchRequest::Move {
        files: vec![encrypted.clone()],
        destination: h.managed("B"),
    });
    let destination = report.remapped[&encrypted].clone();

    assert!(!encrypted.exists());
    assert!(destination.exists());
    assert_eq!(destination.parent().unwrap(), h.managed("B"));

    let record = h.registry.get_by_path(&destination).unwrap().unwrap();
    assert_eq!(record.file_path, destination);
    assert!(record.is_encrypted);
    assert!(h.registry.get_by_path(&encrypted).unwrap().is_none());
}

#[test]
fn decrypt_with_regenerated_key() {
    let h = Harness::new();
    let source = h.public().join("notes.txt");
    fs::write(&source, b"top secret notes".repeat(64)).unwrap();
    let hidden = h.hide(&source, &h.managed("Docs"));
    let encrypted = h.coordinator.encrypt(&[hidden.clone()]).remapped[&hidden].clone();
    let ciphertext = fs::read(&encrypted).unwrap();

    // Lose the stored key; the next resolution silently generates a new one
    h.keys
        .save(&KeySettings {
            secret_key: Some("corrupted".into()),
            ..Default::default()
        })
        .unwrap();

    let report = h.coordinator.decrypt(&[encrypted.clone()], None);
    let restored = h.managed("Docs").join("notes.txt");

    if report.failed == 1 {
        // Bad padding: nothing left behind, state untouched
        assert!(!restored.exists());
        assert_eq!(fs::read(&encrypted).unwrap(), ciphertext);
        assert!(h.registry.get_by_path(&encrypted).unwrap().unwrap().is_encrypted);
    } else {
        // Padding validated by chance: the output is garbage
        assert_ne!(fs::read(&restored).unwrap(), b"top secret notes".repeat(64));
    }
}

#[test]
fn unhide_plain_file_without_record() {
    let h = Harness::new();
    let hidden = h.managed("Loose").join("memo.txt");
    fs::create_dir_all(hidden.parent().unwrap()).unwrap();
    fs::write(&hidden, b"buy milk").unwrap();

    let public = h.public();
    let report = h.coordinator.execute(&BatchRequest::Unhide {
        files: vec![hidden.clone()],
        destination: public.clone(),
    });

    assert_eq!(report.status(), BatchStatus::AllSucceeded);
    assert!(!hidden.exists());
    assert_eq!(fs::read(public.join("memo.txt")).unwrap(), b"buy milk");
    assert_eq!(h.registry.count().unwrap(), 0);
}

#[test]
fn failed_item_does_not_disturb_batch() {
    let h = Harness::new();
    let folder = h.managed("Mixed");
    fs::create_dir_all(&folder).unwrap();
    let a = folder.join("a.png");
    let b = folder.join("b.png");
    fs::write(&a, b"aaaa").unwrap();
    fs::write(&b, b"bbbb").unwrap();

    let report = h.coordinator.encrypt(&[a.clone(), folder.join("missing.png"), b.clone()]);
    assert_eq!((report.succeeded, report.failed), (2, 1));
    assert_eq!(report.status(), BatchStatus::Partial);

    for path in [folder.join("a.enc"), folder.join("b.enc")] {
        assert!(h.registry.get_by_path(&path).unwrap().unwrap().is_encrypted);
        assert!(fs::metadata(&path).unwrap().len() >= 16);
    }
}

#[test]
fn live_listing_tracks_batches() {
    let h = Harness::new();
    let mut live = h.registry.subscribe();
    let source = h.public().join("song.flac");
    fs::write(&source, b"flac").unwrap();

    let hidden = h.hide(&source, &h.managed("Music"));
    assert!(live.has_changed().unwrap());
    assert_eq!(live.borrow_and_update()[0].file_path, hidden);

    h.coordinator.delete(&[hidden]);
    assert!(live.borrow_and_update().is_empty());
}
