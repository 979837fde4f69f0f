use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::error::StorageError;
use crate::storage::journal::{FileJournal, JournalEntry};
use crate::storage_traits::{
    key_in_range, validate_read, HistoryIterator, KeyModification, Version, VersionedValue,
    WorldState, WorldStateIterator, WriteBatch,
};

/// One write in the append-only arena
#[derive(Debug, Clone)]
struct LogRecord {
    tx_id: String,
    timestamp: DateTime<Utc>,
    version: Version,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    height: Version,
    /// Every write ever applied, in commit order
    log: Vec<LogRecord>,
    /// Key -> index into `log` of its live value
    current: BTreeMap<String, usize>,
    /// Key -> indexes into `log`, oldest first
    history: HashMap<String, Vec<usize>>,
}

impl Inner {
    fn current_version(&self, key: &str) -> Option<Version> {
        self.current.get(key).map(|&idx| self.log[idx].version)
    }

    fn apply(&mut self, version: Version, batch: &WriteBatch) {
        for (key, value) in &batch.writes {
            let idx = self.log.len();
            self.log.push(LogRecord {
                tx_id: batch.tx_id.clone(),
                timestamp: batch.timestamp,
                version,
                value: value.clone(),
            });
            self.history.entry(key.clone()).or_default().push(idx);
            match value {
                Some(_) => {
                    self.current.insert(key.clone(), idx);
                }
                None => {
                    self.current.remove(key);
                }
            }
        }
        self.height = version;
    }
}

/// In-memory world state backed by an append-only arena of writes.
///
/// Current state and per-key history are both indexes into the same log, so
/// nothing is ever removed. With a journal attached, every batch is made durable
/// before it is applied and `open` replays the journal on start-up.
#[derive(Debug, Default)]
pub struct MemoryWorldState {
    inner: RwLock<Inner>,
    journal: Option<FileJournal>,
}

impl MemoryWorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journaled store, replaying whatever the journal already holds
    pub fn open<P: AsRef<Path>>(journal_path: P) -> Result<Self, StorageError> {
        let mut inner = Inner::default();
        let mut replayed = 0usize;

        let mut entries = FileJournal::replay(journal_path.as_ref())?;
        for entry in entries.by_ref() {
            let entry = entry?;
            if entry.version != inner.height + 1 {
                return Err(StorageError::Journal(format!(
                    "Journal gap: expected height {}, found {}",
                    inner.height + 1,
                    entry.version
                )));
            }
            inner.apply(entry.version, &entry.batch);
            replayed += 1;
        }

        // A crash mid-append leaves a partial record that was never applied
        if let Some(valid_len) = entries.torn_tail() {
            log::warn!(
                "Discarding partially written journal record at offset {} of {}",
                valid_len,
                journal_path.as_ref().display()
            );
            FileJournal::truncate(journal_path.as_ref(), valid_len)?;
        }

        log::info!(
            "Replayed {} journal entries from {} (height {})",
            replayed,
            journal_path.as_ref().display(),
            inner.height
        );

        Ok(Self {
            inner: RwLock::new(inner),
            journal: Some(FileJournal::open(journal_path)?),
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|e| StorageError::Other(format!("Failed to acquire read lock: {}", e)))
    }
}

impl WorldState for MemoryWorldState {
    fn get_state(&self, key: &str) -> Result<Option<VersionedValue>, StorageError> {
        let inner = self.read()?;
        Ok(inner.current.get(key).and_then(|&idx| {
            let record = &inner.log[idx];
            record.value.as_ref().map(|value| VersionedValue {
                value: value.clone(),
                version: record.version,
            })
        }))
    }

    fn scan_range(&self, start: &str, end: &str) -> Box<dyn WorldStateIterator + '_> {
        let inner = match self.read() {
            Ok(inner) => inner,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };

        // Snapshot the range under the lock so the scan never sees a later commit
        let snapshot: Vec<Result<(String, Vec<u8>), StorageError>> = inner
            .current
            .range(start.to_string()..)
            .take_while(|(key, _)| key_in_range(key, start, end))
            .filter_map(|(key, &idx)| {
                inner.log[idx]
                    .value
                    .as_ref()
                    .map(|value| Ok((key.clone(), value.clone())))
            })
            .collect();

        Box::new(snapshot.into_iter())
    }

    fn history_for_key(&self, key: &str) -> Box<dyn HistoryIterator + '_> {
        let inner = match self.read() {
            Ok(inner) => inner,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };

        let entries: Vec<Result<KeyModification, StorageError>> = inner
            .history
            .get(key)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|&idx| {
                        let record = &inner.log[idx];
                        Ok(KeyModification {
                            tx_id: record.tx_id.clone(),
                            timestamp: record.timestamp,
                            version: record.version,
                            value: record.value.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Box::new(entries.into_iter())
    }

    fn commit(&self, batch: &WriteBatch) -> Result<Version, StorageError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StorageError::Other(format!("Failed to acquire write lock: {}", e)))?;

        for (key, observed) in &batch.reads {
            validate_read(key, *observed, inner.current_version(key))?;
        }

        let version = inner.height + 1;

        if let Some(journal) = &self.journal {
            journal.append(&JournalEntry {
                version,
                batch: batch.clone(),
            })?;
        }

        inner.apply(version, batch);
        log::debug!(
            "Committed tx {} at height {} ({} writes)",
            batch.tx_id,
            version,
            batch.writes.len()
        );

        Ok(version)
    }

    fn height(&self) -> Result<Version, StorageError> {
        Ok(self.read()?.height)
    }
}
