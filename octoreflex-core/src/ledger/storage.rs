// Audit Ledger & Storage (spec §4.12): RocksDB-backed append-only store,
// keyed so entries sort chronologically within a PID's chain.
//
// Adapted from the teacher's generic `Database` wrapper
// (`kratos-core/src/storage/db.rs`): same open/get/put/batch_write shape,
// same "skip and warn on iteration error rather than panic" fix, narrowed
// to the ledger's own schema-versioned, prefix-pruned use.

use super::decision::DecisionRecord;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const SCHEMA_VERSION: u32 = 1;
const SCHEMA_KEY: &[u8] = b"__schema_version";
const TIP_HASH_KEY: &[u8] = b"__tip_hash";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open ledger db: {0}")]
    OpenFailed(String),
    #[error("ledger read failed: {0}")]
    ReadFailed(String),
    #[error("ledger write failed: {0}")]
    WriteFailed(String),
    #[error("ledger serialization failed: {0}")]
    SerializationFailed(String),
    #[error("schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

pub struct LedgerStore {
    db: Arc<DB>,
}

impl LedgerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(5);
        opts.set_max_manifest_file_size(64 * 1024 * 1024);
        opts.set_max_background_jobs(2);

        let db = DB::open(&opts, path).map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.check_or_init_schema()?;
        Ok(store)
    }

    fn check_or_init_schema(&self) -> Result<(), StorageError> {
        match self
            .db
            .get(SCHEMA_KEY)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            Some(bytes) => {
                let found = u32::from_be_bytes(
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| StorageError::SerializationFailed("schema key corrupt".into()))?,
                );
                if found != SCHEMA_VERSION {
                    return Err(StorageError::SchemaMismatch {
                        found,
                        expected: SCHEMA_VERSION,
                    });
                }
                Ok(())
            }
            None => {
                self.db
                    .put(SCHEMA_KEY, SCHEMA_VERSION.to_be_bytes())
                    .map_err(|e| StorageError::WriteFailed(e.to_string()))
            }
        }
    }

    /// Fsyncs the record before returning, satisfying invariant L1 (durable
    /// in the ledger before the filter-map update is applied).
    pub fn append(&self, record: &DecisionRecord) -> Result<(), StorageError> {
        let value = bincode::serialize(record)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        let mut batch = rocksdb::WriteBatch::default();
        batch.put(record.storage_key(), value);
        batch.put(TIP_HASH_KEY, record.decision_hash.as_bytes());

        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    pub fn tip_hash(&self) -> Result<crate::types::Hash, StorageError> {
        match self
            .db
            .get(TIP_HASH_KEY)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(&bytes);
                Ok(crate::types::Hash(buf))
            }
            _ => Ok(crate::types::Hash::ZERO),
        }
    }

    /// Iterates all records in chronological/PID-sorted key order,
    /// skipping and logging entries that fail to deserialize rather than
    /// aborting the whole scan.
    pub fn iter_all(&self) -> impl Iterator<Item = DecisionRecord> + '_ {
        self.db
            .iterator(rocksdb::IteratorMode::Start)
            .filter_map(|item| match item {
                Ok((key, value)) => {
                    if key.as_ref() == SCHEMA_KEY || key.as_ref() == TIP_HASH_KEY {
                        return None;
                    }
                    match bincode::deserialize::<DecisionRecord>(&value) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            tracing::warn!("ledger record deserialize failed (skipping): {}", e);
                            None
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("ledger iteration error (skipping): {}", e);
                    None
                }
            })
    }

    /// Deletes records whose timestamp key prefix is older than the
    /// retention cutoff. Baselines and the schema/tip-hash keys are never
    /// touched here.
    pub fn prune_older_than(&self, cutoff_ns: u64) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        let mut batch = rocksdb::WriteBatch::default();
        for (key, _) in self.db.iterator(rocksdb::IteratorMode::Start).filter_map(|i| i.ok()) {
            if key.as_ref() == SCHEMA_KEY || key.as_ref() == TIP_HASH_KEY {
                continue;
            }
            if key.len() < 8 {
                continue;
            }
            let ts = u64::from_be_bytes(key[..8].try_into().unwrap());
            if ts < cutoff_ns {
                batch.delete(key);
                removed += 1;
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(removed)
    }
}
