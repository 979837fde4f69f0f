use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::storage_traits::{Version, WriteBatch};

/// A committed batch as recorded in the journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Height the batch was committed at
    pub version: Version,

    /// The batch itself
    pub batch: WriteBatch,
}

/// Append-only file of committed batches.
///
/// Each record is a little-endian `u64` length followed by the bincode encoding
/// of a `JournalEntry`. An entry is appended and flushed before the batch is
/// applied in memory, so replaying the file rebuilds the exact same state.
pub struct FileJournal {
    /// Path to the journal file
    path: PathBuf,

    /// File handle for writing
    file: Mutex<BufWriter<File>>,
}

impl FileJournal {
    /// Open (creating if needed) a journal for appending
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::Journal(format!("Failed to open journal file: {}", e)))?;

        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a committed batch and make it durable
    pub fn append(&self, entry: &JournalEntry) -> Result<(), StorageError> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| StorageError::Journal(format!("Failed to acquire lock: {}", e)))?;

        let serialized = bincode::serialize(entry)?;

        // Write the entry length and data
        let entry_len = serialized.len() as u64;
        file.write_all(&entry_len.to_le_bytes())?;
        file.write_all(&serialized)?;
        file.flush()?;
        file.get_ref().sync_data()?;

        Ok(())
    }

    /// Read every entry recorded at `path`, oldest first. A missing file is an empty journal.
    ///
    /// A final record cut short by a crash during `append` ends the replay;
    /// `JournalIterator::torn_tail` then reports where the intact log ends.
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<JournalIterator, StorageError> {
        match File::open(path.as_ref()) {
            Ok(file) => {
                let file_len = file.metadata()?.len();
                Ok(JournalIterator {
                    reader: Some(BufReader::new(file)),
                    offset: 0,
                    file_len,
                    torn_tail: None,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(JournalIterator {
                reader: None,
                offset: 0,
                file_len: 0,
                torn_tail: None,
            }),
            Err(e) => Err(StorageError::Journal(format!(
                "Failed to open journal {}: {}",
                path.as_ref().display(),
                e
            ))),
        }
    }

    /// Cut the journal at `path` back to its first `valid_len` bytes
    pub fn truncate<P: AsRef<Path>>(path: P, valid_len: u64) -> Result<(), StorageError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path.as_ref())
            .map_err(|e| StorageError::Journal(format!("Failed to open journal file: {}", e)))?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal")
            .field("path", &self.path)
            .finish()
    }
}

/// Iterator over journal entries
pub struct JournalIterator {
    reader: Option<BufReader<File>>,
    /// Byte offset of the next record
    offset: u64,
    file_len: u64,
    torn_tail: Option<u64>,
}

impl JournalIterator {
    /// Length of the intact log if replay stopped at a partially written record
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_tail
    }

    fn stop_at_torn_tail(&mut self) -> Option<Result<JournalEntry, StorageError>> {
        self.torn_tail = Some(self.offset);
        self.reader = None;
        None
    }
}

impl Iterator for JournalIterator {
    type Item = Result<JournalEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;

        let remaining = self.file_len.saturating_sub(self.offset);
        if remaining == 0 {
            self.reader = None;
            return None;
        }
        if remaining < 8 {
            return self.stop_at_torn_tail();
        }

        // Read the entry length
        let mut len_buf = [0u8; 8];
        if let Err(e) = reader.read_exact(&mut len_buf) {
            self.reader = None;
            return Some(Err(StorageError::from(e)));
        }

        // The length is only trusted once the file is known to hold that many bytes
        let entry_len = u64::from_le_bytes(len_buf);
        if entry_len > remaining - 8 {
            return self.stop_at_torn_tail();
        }

        // Read the entry data
        let mut entry_data = vec![0u8; entry_len as usize];
        if let Err(e) = reader.read_exact(&mut entry_data) {
            self.reader = None;
            return Some(Err(StorageError::Journal(format!(
                "Failed to read journal entry at offset {}: {}",
                self.offset, e
            ))));
        }
        self.offset += 8 + entry_len;

        Some(bincode::deserialize(&entry_data).map_err(StorageError::from))
    }
}
