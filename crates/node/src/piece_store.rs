//! The piece store seam.
//!
//! The physical blob backend is an external collaborator; the node only
//! needs put/get/delete/has over piece keys. Two reference implementations:
//! in-memory (tests, dev) and a local filesystem layout.
//!
//! Piece keys: `s{seg}_{object_id}` for primary pieces,
//! `e{seg}_{replicate_idx}_{object_id}` for secondary pieces.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PieceStoreError {
    #[error("piece io error: {0}")]
    Io(String),
    #[error("invalid piece key: {0}")]
    InvalidKey(String),
}

pub trait PieceStore: Send + Sync {
    fn put_piece(&self, key: &str, data: &[u8]) -> Result<(), PieceStoreError>;
    fn get_piece(&self, key: &str) -> Result<Option<Vec<u8>>, PieceStoreError>;
    fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError>;
    fn has_piece(&self, key: &str) -> Result<bool, PieceStoreError>;
}

/// Key of a primary SP's segment piece.
pub fn primary_piece_key(object_id: u64, segment_idx: u32) -> String {
    format!("s{}_{}", segment_idx, object_id)
}

/// Key of a secondary SP's piece for one redundancy slot.
pub fn secondary_piece_key(object_id: u64, segment_idx: u32, replicate_idx: u32) -> String {
    format!("e{}_{}_{}", segment_idx, replicate_idx, object_id)
}

fn check_key(key: &str) -> Result<(), PieceStoreError> {
    if key.is_empty()
        || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(PieceStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemPieceStore {
    pieces: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemPieceStore {
    pub fn new() -> MemPieceStore {
        MemPieceStore::default()
    }

    pub fn len(&self) -> usize {
        self.pieces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.read().is_empty()
    }
}

impl PieceStore for MemPieceStore {
    fn put_piece(&self, key: &str, data: &[u8]) -> Result<(), PieceStoreError> {
        check_key(key)?;
        self.pieces.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get_piece(&self, key: &str) -> Result<Option<Vec<u8>>, PieceStoreError> {
        check_key(key)?;
        Ok(self.pieces.read().get(key).cloned())
    }

    fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError> {
        check_key(key)?;
        self.pieces.write().remove(key);
        Ok(())
    }

    fn has_piece(&self, key: &str) -> Result<bool, PieceStoreError> {
        check_key(key)?;
        Ok(self.pieces.read().contains_key(key))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LOCAL FILESYSTEM STORE
// ════════════════════════════════════════════════════════════════════════════

/// One file per piece under `root`, fanned out by the key's tail digits so
/// a single directory never collects millions of entries.
#[derive(Debug)]
pub struct LocalFsPieceStore {
    root: PathBuf,
}

impl LocalFsPieceStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<LocalFsPieceStore, PieceStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PieceStoreError::Io(e.to_string()))?;
        Ok(LocalFsPieceStore { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PieceStoreError> {
        check_key(key)?;
        let shard = format!("{:02}", key.bytes().map(u64::from).sum::<u64>() % 100);
        Ok(self.root.join(shard).join(key))
    }
}

impl PieceStore for LocalFsPieceStore {
    fn put_piece(&self, key: &str, data: &[u8]) -> Result<(), PieceStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PieceStoreError::Io(e.to_string()))?;
        }
        fs::write(&path, data).map_err(|e| PieceStoreError::Io(e.to_string()))
    }

    fn get_piece(&self, key: &str) -> Result<Option<Vec<u8>>, PieceStoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PieceStoreError::Io(e.to_string())),
        }
    }

    fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PieceStoreError::Io(e.to_string())),
        }
    }

    fn has_piece(&self, key: &str) -> Result<bool, PieceStoreError> {
        Ok(self.path_for(key)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_keys_are_distinct_per_slot() {
        assert_eq!(primary_piece_key(7, 0), "s0_7");
        assert_eq!(secondary_piece_key(7, 0, 2), "e0_2_7");
        assert_ne!(secondary_piece_key(7, 1, 2), secondary_piece_key(7, 2, 1));
    }

    #[test]
    fn mem_store_roundtrip() {
        let store = MemPieceStore::new();
        let key = primary_piece_key(1, 0);
        store.put_piece(&key, b"piece data").expect("put");
        assert!(store.has_piece(&key).expect("has"));
        assert_eq!(store.get_piece(&key).expect("get").as_deref(), Some(&b"piece data"[..]));
        store.delete_piece(&key).expect("delete");
        assert_eq!(store.get_piece(&key).expect("get"), None);
    }

    #[test]
    fn localfs_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalFsPieceStore::new(dir.path()).expect("store");
        let key = secondary_piece_key(42, 3, 1);
        store.put_piece(&key, b"secondary piece").expect("put");
        assert!(store.has_piece(&key).expect("has"));
        assert_eq!(
            store.get_piece(&key).expect("get").as_deref(),
            Some(&b"secondary piece"[..])
        );
        // deleting a missing piece is fine
        store.delete_piece(&key).expect("delete");
        store.delete_piece(&key).expect("delete twice");
        assert!(!store.has_piece(&key).expect("has"));
    }

    #[test]
    fn keys_with_separators_are_rejected() {
        let store = MemPieceStore::new();
        assert!(store.put_piece("../escape", b"x").is_err());
        assert!(store.get_piece("", ).is_err());
    }
}
