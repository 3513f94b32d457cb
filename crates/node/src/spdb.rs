//! The SP-DB seam.
//!
//! The real deployment backs this with the SQL indexer; the node core only
//! depends on this narrow interface: object integrity meta, upload progress,
//! deletion marks fed by chain events, and off-chain-auth keys. The
//! in-memory implementation is the reference used by tests and dev nodes.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ospn_task::ObjectInfo;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("db error: {0}")]
    Internal(String),
}

/// Integrity record for an object's pieces held by this SP.
/// `replicate_idx` is `None` for the primary copy, `Some(idx)` for a
/// secondary redundancy slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityMeta {
    pub object_id: u64,
    pub replicate_idx: Option<u32>,
    pub integrity_hash: [u8; 32],
    pub checksums: Vec<[u8; 32]>,
}

/// Upload lifecycle states recorded per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadProgress {
    Uploading,
    Uploaded,
    Replicating,
    Sealing,
    Sealed,
    UploadFailed,
    ReplicateFailed,
    SealFailed,
}

/// Off-chain-auth key row per (account, domain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffChainAuthKey {
    pub account: String,
    pub domain: String,
    pub current_nonce: u64,
    pub public_key: Vec<u8>,
    pub expiry_ms: i64,
}

pub trait SpDb: Send + Sync {
    fn set_object_info(&self, info: ObjectInfo) -> Result<(), DbError>;
    fn get_object_info(&self, bucket: &str, object: &str)
        -> Result<Option<ObjectInfo>, DbError>;

    fn set_object_integrity(&self, meta: IntegrityMeta) -> Result<(), DbError>;
    fn get_object_integrity(
        &self,
        object_id: u64,
        replicate_idx: Option<u32>,
    ) -> Result<Option<IntegrityMeta>, DbError>;
    fn delete_object_integrity(&self, object_id: u64) -> Result<(), DbError>;
    fn list_integrity_object_ids(&self) -> Result<Vec<u64>, DbError>;

    fn set_upload_progress(
        &self,
        object_id: u64,
        progress: UploadProgress,
    ) -> Result<(), DbError>;
    fn get_upload_progress(&self, object_id: u64)
        -> Result<Option<UploadProgress>, DbError>;

    /// Record that the chain deleted an object at `block` (fed by the block
    /// syncer collaborator); GC consumes these marks.
    fn mark_object_deleted(&self, object_id: u64, block: u64) -> Result<(), DbError>;
    fn list_deleted_objects(
        &self,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<u64>, DbError>;

    fn get_auth_key(
        &self,
        account: &str,
        domain: &str,
    ) -> Result<Option<OffChainAuthKey>, DbError>;
    fn upsert_auth_key(&self, key: OffChainAuthKey) -> Result<(), DbError>;

    /// Drop auth keys whose expiry passed; returns how many were removed.
    fn purge_expired_auth_keys(&self, now_ms: i64) -> Result<usize, DbError>;
}

// ════════════════════════════════════════════════════════════════════════════
// IN-MEMORY REFERENCE IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemSpDb {
    objects: RwLock<HashMap<(String, String), ObjectInfo>>,
    integrity: RwLock<HashMap<(u64, Option<u32>), IntegrityMeta>>,
    progress: RwLock<HashMap<u64, UploadProgress>>,
    deleted: RwLock<HashMap<u64, u64>>,
    auth_keys: RwLock<HashMap<(String, String), OffChainAuthKey>>,
}

impl MemSpDb {
    pub fn new() -> MemSpDb {
        MemSpDb::default()
    }
}

impl SpDb for MemSpDb {
    fn set_object_info(&self, info: ObjectInfo) -> Result<(), DbError> {
        self.objects
            .write()
            .insert((info.bucket_name.clone(), info.object_name.clone()), info);
        Ok(())
    }

    fn get_object_info(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<Option<ObjectInfo>, DbError> {
        Ok(self
            .objects
            .read()
            .get(&(bucket.to_string(), object.to_string()))
            .cloned())
    }

    fn set_object_integrity(&self, meta: IntegrityMeta) -> Result<(), DbError> {
        self.integrity.write().insert((meta.object_id, meta.replicate_idx), meta);
        Ok(())
    }

    fn get_object_integrity(
        &self,
        object_id: u64,
        replicate_idx: Option<u32>,
    ) -> Result<Option<IntegrityMeta>, DbError> {
        Ok(self.integrity.read().get(&(object_id, replicate_idx)).cloned())
    }

    fn delete_object_integrity(&self, object_id: u64) -> Result<(), DbError> {
        self.integrity.write().retain(|(id, _), _| *id != object_id);
        Ok(())
    }

    fn list_integrity_object_ids(&self) -> Result<Vec<u64>, DbError> {
        let mut ids: Vec<u64> =
            self.integrity.read().keys().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn set_upload_progress(
        &self,
        object_id: u64,
        progress: UploadProgress,
    ) -> Result<(), DbError> {
        self.progress.write().insert(object_id, progress);
        Ok(())
    }

    fn get_upload_progress(
        &self,
        object_id: u64,
    ) -> Result<Option<UploadProgress>, DbError> {
        Ok(self.progress.read().get(&object_id).copied())
    }

    fn mark_object_deleted(&self, object_id: u64, block: u64) -> Result<(), DbError> {
        self.deleted.write().insert(object_id, block);
        Ok(())
    }

    fn list_deleted_objects(
        &self,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<u64>, DbError> {
        let mut ids: Vec<u64> = self
            .deleted
            .read()
            .iter()
            .filter(|(_, block)| **block >= start_block && **block <= end_block)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn get_auth_key(
        &self,
        account: &str,
        domain: &str,
    ) -> Result<Option<OffChainAuthKey>, DbError> {
        Ok(self
            .auth_keys
            .read()
            .get(&(account.to_string(), domain.to_string()))
            .cloned())
    }

    fn upsert_auth_key(&self, key: OffChainAuthKey) -> Result<(), DbError> {
        self.auth_keys
            .write()
            .insert((key.account.clone(), key.domain.clone()), key);
        Ok(())
    }

    fn purge_expired_auth_keys(&self, now_ms: i64) -> Result<usize, DbError> {
        let mut keys = self.auth_keys.write();
        let before = keys.len();
        keys.retain(|_, k| k.expiry_ms > now_ms);
        Ok(before - keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_is_keyed_by_object_and_slot() {
        let db = MemSpDb::new();
        let primary = IntegrityMeta {
            object_id: 1,
            replicate_idx: None,
            integrity_hash: [1; 32],
            checksums: vec![[2; 32]],
        };
        let secondary = IntegrityMeta {
            object_id: 1,
            replicate_idx: Some(3),
            integrity_hash: [4; 32],
            checksums: vec![[5; 32]],
        };
        db.set_object_integrity(primary.clone()).expect("set");
        db.set_object_integrity(secondary.clone()).expect("set");
        assert_eq!(db.get_object_integrity(1, None).expect("get"), Some(primary));
        assert_eq!(db.get_object_integrity(1, Some(3)).expect("get"), Some(secondary));
        assert_eq!(db.list_integrity_object_ids().expect("list"), vec![1]);

        db.delete_object_integrity(1).expect("delete");
        assert_eq!(db.get_object_integrity(1, None).expect("get"), None);
        assert_eq!(db.get_object_integrity(1, Some(3)).expect("get"), None);
    }

    #[test]
    fn deleted_marks_filter_by_block_range() {
        let db = MemSpDb::new();
        db.mark_object_deleted(10, 100).expect("mark");
        db.mark_object_deleted(11, 200).expect("mark");
        db.mark_object_deleted(12, 300).expect("mark");
        assert_eq!(db.list_deleted_objects(150, 300).expect("list"), vec![11, 12]);
        assert!(db.list_deleted_objects(400, 500).expect("list").is_empty());
    }

    #[test]
    fn auth_keys_roundtrip() {
        let db = MemSpDb::new();
        assert_eq!(db.get_auth_key("0xa", "dapp.example").expect("get"), None);
        let key = OffChainAuthKey {
            account: "0xa".into(),
            domain: "dapp.example".into(),
            current_nonce: 1,
            public_key: vec![7; 32],
            expiry_ms: 123,
        };
        db.upsert_auth_key(key.clone()).expect("upsert");
        assert_eq!(db.get_auth_key("0xa", "dapp.example").expect("get"), Some(key));
    }
}
