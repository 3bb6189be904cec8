use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use std::{path::Path, str};

mod device;
mod user;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt record under key {0}")]
    Corrupt(String),
    #[error("unique constraint {index} violated by '{value}'")]
    UniqueViolation { index: &'static str, value: String },
    #[error("sensors do not exist: {}", .0.join(", "))]
    MissingSensors(Vec<String>),
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// RocksDB-backed relational-ish store.
///
/// Rows are JSON values under `<table>:<key>`; secondary indexes are plain keys
/// whose presence doubles as a uniqueness constraint. Every mutation holds
/// `write_lock` while it re-checks constraints and commits a single
/// [`WriteBatch`], so a check-then-insert cannot interleave with another one.
pub struct DBLayer {
    db: DB,
    write_lock: Mutex<()>,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    // ============================================================
    // KEYS
    // ============================================================
    fn id_key(table: &str, id: u64) -> String {
        format!("{table}:{id:020}")
        // 020 → zero-padded id so prefix scans come back in insertion order
    }

    fn seq_key(table: &str) -> String {
        format!("seq:{table}")
    }

    // ============================================================
    // PRIMITIVES
    // ============================================================
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.db
            .get(key)?
            .map(|val| serde_json::from_slice(&val))
            .transpose()
            .map_err(StoreError::from)
    }

    fn get_id(&self, key: &str) -> StoreResult<Option<u64>> {
        match self.db.get(key)? {
            Some(val) => str::from_utf8(&val)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(key.to_string())),
            None => Ok(None),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.db.get_pinned(key)?.is_some())
    }

    fn put_json<T: Serialize>(batch: &mut WriteBatch, key: &str, value: &T) -> StoreResult<()> {
        batch.put(key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn put_id(batch: &mut WriteBatch, key: &str, id: u64) {
        batch.put(key, id.to_string());
    }

    /// Every value stored under `prefix`, in key order.
    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> StoreResult<Vec<T>> {
        let mut out = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, val) = item?;
            let k = str::from_utf8(&key).map_err(|_| StoreError::Corrupt(prefix.to_string()))?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push(serde_json::from_slice(&val)?);
        }
        Ok(out)
    }

    /// The part of every key under `prefix` that follows the prefix.
    fn scan_suffixes(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut out = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, _) = item?;
            let k = str::from_utf8(&key).map_err(|_| StoreError::Corrupt(prefix.to_string()))?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push(k[prefix.len()..].to_string());
        }
        Ok(out)
    }

    /// Allocate the next surrogate id for `table`. Must be called with
    /// `write_lock` held; the bumped counter is written through `batch`.
    fn next_id(&self, batch: &mut WriteBatch, table: &str) -> StoreResult<u64> {
        let key = Self::seq_key(table);
        let id = self.get_id(&key)?.unwrap_or(1);
        Self::put_id(batch, &key, id + 1);
        Ok(id)
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, std::sync::Arc<DBLayer>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = DBLayer::new(dir.path().join("db")).expect("open rocksdb");
    (dir, std::sync::Arc::new(db))
}
