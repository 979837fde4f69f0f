use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::iter::Iterator;

use crate::error::StorageError;

/// Commit sequence number. Every committed batch gets the next height, and every
/// key written by that batch carries it as its version.
pub type Version = u64;

/// A committed value together with the height that wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: Version,
}

/// One entry of a key's modification history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    /// Transaction that wrote this entry
    pub tx_id: String,

    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,

    /// Height of the commit
    pub version: Version,

    /// New value, or `None` when the key was deleted
    pub value: Option<Vec<u8>>,
}

impl KeyModification {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// The read and write sets of one transaction, applied atomically by `commit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    /// Hex transaction id
    pub tx_id: String,

    /// Transaction timestamp recorded in history
    pub timestamp: DateTime<Utc>,

    /// Keys read by the transaction and the version observed (`None` = absent)
    pub reads: Vec<(String, Option<Version>)>,

    /// Keys written; `None` records a delete
    pub writes: Vec<(String, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Iterator over `(key, value)` pairs of a range scan, in key order
pub trait WorldStateIterator: Iterator<Item = Result<(String, Vec<u8>), StorageError>> {}

impl<T> WorldStateIterator for T where T: Iterator<Item = Result<(String, Vec<u8>), StorageError>> {}

/// Iterator over the history of one key, oldest first
pub trait HistoryIterator: Iterator<Item = Result<KeyModification, StorageError>> {}

impl<T> HistoryIterator for T where T: Iterator<Item = Result<KeyModification, StorageError>> {}

/// Key-value world state with per-key history, as provided by the host ledger
///
/// Implementations never physically drop history: a delete removes the key
/// from the current state and appends a tombstone to its history.
pub trait WorldState: Send + Sync {
    /// Get the committed value of a key
    ///
    /// # Parameters
    /// * `key` - The key to read
    ///
    /// # Returns
    /// Some(value) with its version if the key is present, None otherwise
    fn get_state(&self, key: &str) -> Result<Option<VersionedValue>, StorageError>;

    /// Scan committed keys in `[start, end)` in byte order
    ///
    /// # Parameters
    /// * `start` - Inclusive lower bound, `""` for the beginning of the key space
    /// * `end` - Exclusive upper bound, `""` for no upper bound
    ///
    /// # Returns
    /// A boxed iterator over a point-in-time snapshot of the range
    fn scan_range(&self, start: &str, end: &str) -> Box<dyn WorldStateIterator + '_>;

    /// Get the modification history of a key
    ///
    /// # Parameters
    /// * `key` - The key whose history is requested
    ///
    /// # Returns
    /// A boxed iterator yielding entries oldest to newest
    fn history_for_key(&self, key: &str) -> Box<dyn HistoryIterator + '_>;

    /// Validate the read set of `batch` and apply its writes atomically
    ///
    /// # Parameters
    /// * `batch` - Reads to validate and writes to apply
    ///
    /// # Returns
    /// The height assigned to the batch, or `StorageError::Conflict` naming the
    /// first key whose version changed since it was read. Nothing is applied on error.
    fn commit(&self, batch: &WriteBatch) -> Result<Version, StorageError>;

    /// Height of the last committed batch, 0 for an empty store
    fn height(&self) -> Result<Version, StorageError>;
}

/// Compare a recorded read against the current version of the key
pub fn validate_read(
    key: &str,
    observed: Option<Version>,
    current: Option<Version>,
) -> Result<(), StorageError> {
    if observed == current {
        Ok(())
    } else {
        Err(StorageError::Conflict(key.to_string()))
    }
}

/// Whether `key` falls in the `[start, end)` range with `""` meaning unbounded
pub fn key_in_range(key: &str, start: &str, end: &str) -> bool {
    key >= start && (end.is_empty() || key < end)
}
