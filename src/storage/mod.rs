// Re-export the storage trait
pub use crate::storage_traits::{HistoryIterator, WorldState, WorldStateIterator};

pub mod journal;
mod memory;

pub use journal::{FileJournal, JournalEntry};
pub use memory::MemoryWorldState;

// Export implementations
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteWorldState;

#[cfg(feature = "rocksdb")]
mod rocksdb;
#[cfg(feature = "rocksdb")]
pub use self::rocksdb::RocksDbWorldState;
