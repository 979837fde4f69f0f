use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::StorageError;
use crate::storage_traits::{
    key_in_range, validate_read, HistoryIterator, KeyModification, Version, VersionedValue,
    WorldState, WorldStateIterator, WriteBatch,
};

// Column family names used to organize different types of data
const CF_STATE: &str = "state";
const CF_HISTORY: &str = "history";
const CF_META: &str = "meta";

const HEIGHT_KEY: &[u8] = b"height";

/// History rows are keyed by `len(key) | key | version`, all big-endian, so a
/// prefix scan over `len(key) | key` yields one key's history in commit order.
fn history_prefix(key: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + key.len());
    prefix.extend_from_slice(&(key.len() as u32).to_be_bytes());
    prefix.extend_from_slice(key.as_bytes());
    prefix
}

fn make_history_key(key: &str, version: Version) -> Vec<u8> {
    let mut history_key = history_prefix(key);
    history_key.extend_from_slice(&version.to_be_bytes());
    history_key
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRecord {
    tx_id: String,
    timestamp: DateTime<Utc>,
    value: Option<Vec<u8>>,
}

/// RocksDB implementation of WorldState
pub struct RocksDbWorldState {
    db: DB,
    db_path: PathBuf,
    /// Serializes read validation with the write that follows it
    commit_lock: Mutex<()>,
}

impl RocksDbWorldState {
    /// Creates a new RocksDB world state at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();

        // Set up database options
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // Define column family descriptors
        let descriptors = [CF_STATE, CF_HISTORY, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, &db_path, descriptors)?;

        log::info!("Opened RocksDB world state at {}", db_path.display());

        Ok(Self {
            db,
            db_path,
            commit_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Database(format!("Column family {} not found", name)))
    }

    fn read_height(&self) -> Result<Version, StorageError> {
        let cf_meta = self.cf(CF_META)?;
        match self.db.get_cf(cf_meta, HEIGHT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Serialization("Corrupt height record".to_string())
                })?;
                Ok(Version::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn scan_snapshot(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<Result<(String, Vec<u8>), StorageError>>, StorageError> {
        let cf_state = self.cf(CF_STATE)?;
        let snapshot = self.db.snapshot();
        let mut entries = Vec::new();

        let iter = snapshot.iterator_cf(
            cf_state,
            IteratorMode::From(start.as_bytes(), Direction::Forward),
        );
        for item in iter {
            let (raw_key, raw_value) = item?;
            let key = String::from_utf8(raw_key.into_vec())
                .map_err(|e| StorageError::Serialization(format!("Non UTF-8 key: {}", e)))?;
            if !key_in_range(&key, start, end) {
                break;
            }
            let stored: VersionedValue = bincode::deserialize(&raw_value)?;
            entries.push(Ok((key, stored.value)));
        }

        Ok(entries)
    }

    fn history_snapshot(&self, key: &str) -> Result<Vec<Result<KeyModification, StorageError>>, StorageError> {
        let cf_history = self.cf(CF_HISTORY)?;
        let prefix = history_prefix(key);
        let mut entries = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf_history, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (raw_key, raw_value) = item?;
            if !raw_key.starts_with(&prefix) {
                break;
            }
            let version_bytes: [u8; 8] = raw_key[prefix.len()..].try_into().map_err(|_| {
                StorageError::Serialization("Corrupt history key".to_string())
            })?;
            let record: HistoryRecord = bincode::deserialize(&raw_value)?;
            entries.push(Ok(KeyModification {
                tx_id: record.tx_id,
                timestamp: record.timestamp,
                version: Version::from_be_bytes(version_bytes),
                value: record.value,
            }));
        }

        Ok(entries)
    }
}

impl WorldState for RocksDbWorldState {
    fn get_state(&self, key: &str) -> Result<Option<VersionedValue>, StorageError> {
        let cf_state = self.cf(CF_STATE)?;
        match self.db.get_cf(cf_state, key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_range(&self, start: &str, end: &str) -> Box<dyn WorldStateIterator + '_> {
        match self.scan_snapshot(start, end) {
            Ok(entries) => Box::new(entries.into_iter()),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn history_for_key(&self, key: &str) -> Box<dyn HistoryIterator + '_> {
        match self.history_snapshot(key) {
            Ok(entries) => Box::new(entries.into_iter()),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn commit(&self, batch: &WriteBatch) -> Result<Version, StorageError> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|e| StorageError::Other(format!("Failed to acquire commit lock: {}", e)))?;

        for (key, observed) in &batch.reads {
            let current = self.get_state(key)?.map(|stored| stored.version);
            validate_read(key, *observed, current)?;
        }

        let version = self.read_height()? + 1;
        let cf_state = self.cf(CF_STATE)?;
        let cf_history = self.cf(CF_HISTORY)?;
        let cf_meta = self.cf(CF_META)?;

        let mut write_batch = rocksdb::WriteBatch::default();
        for (key, value) in &batch.writes {
            match value {
                Some(value) => {
                    let stored = VersionedValue {
                        value: value.clone(),
                        version,
                    };
                    write_batch.put_cf(cf_state, key.as_bytes(), bincode::serialize(&stored)?);
                }
                None => write_batch.delete_cf(cf_state, key.as_bytes()),
            }

            let record = HistoryRecord {
                tx_id: batch.tx_id.clone(),
                timestamp: batch.timestamp,
                value: value.clone(),
            };
            write_batch.put_cf(
                cf_history,
                make_history_key(key, version),
                bincode::serialize(&record)?,
            );
        }
        write_batch.put_cf(cf_meta, HEIGHT_KEY, version.to_be_bytes());

        self.db.write(write_batch)?;
        log::debug!(
            "Committed tx {} at height {} ({} writes)",
            batch.tx_id,
            version,
            batch.writes.len()
        );

        Ok(version)
    }

    fn height(&self) -> Result<Version, StorageError> {
        self.read_height()
    }
}

impl Debug for RocksDbWorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbWorldState")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn batch(tx: &str, writes: Vec<(&str, Option<&[u8]>)>) -> WriteBatch {
        WriteBatch {
            tx_id: tx.to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            reads: Vec::new(),
            writes: writes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.map(|v| v.to_vec())))
                .collect(),
        }
    }

    #[test]
    fn test_basic_storage_operations() {
        let temp_dir = tempdir().unwrap();
        let storage = RocksDbWorldState::new(temp_dir.path().join("test.db")).unwrap();

        storage.commit(&batch("tx1", vec![("T1", Some(b"one"))])).unwrap();
        let value = storage.get_state("T1").unwrap().unwrap();
        assert_eq!(value.value, b"one");
        assert_eq!(value.version, 1);

        storage.commit(&batch("tx2", vec![("T1", None)])).unwrap();
        assert!(storage.get_state("T1").unwrap().is_none());

        let history: Vec<_> = storage
            .history_for_key("T1")
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].is_delete());
        assert_eq!(storage.height().unwrap(), 2);
    }

    #[test]
    fn test_history_prefix_isolation() {
        let temp_dir = tempdir().unwrap();
        let storage = RocksDbWorldState::new(temp_dir.path().join("prefix.db")).unwrap();

        // "T1" must not pick up the history of "T10"
        storage.commit(&batch("tx1", vec![("T1", Some(b"a"))])).unwrap();
        storage.commit(&batch("tx2", vec![("T10", Some(b"b"))])).unwrap();

        assert_eq!(storage.history_for_key("T1").count(), 1);
        assert_eq!(storage.history_for_key("T10").count(), 1);

        let keys: Vec<_> = storage
            .scan_range("", "")
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec!["T1", "T10"]);
    }
}
