pub mod authorization;
pub mod canonical;
pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod id;
pub mod ledger;
pub mod objects;
pub mod runtime;
pub mod storage;
pub mod storage_traits;

// Re-export the main types for convenience
pub use authorization::{AllowAll, Authorizer, Identity, Operation, OwnershipPolicy};
pub use config::{ConfigError, LedgerConfig, StorageConfig};
pub use contract::{CreditTokenContract, HistoryEntry, HistoryValue, NewCreditToken};
pub use error::{LedgerError, StorageError};
pub use events::{ChaincodeEvent, EventLog, EventSink, TransferEvent, TRANSFER_EVENT_NAME};
pub use id::{TokenId, TxId};
pub use ledger::CreditLedger;
pub use objects::{CreditToken, TokenStatus, TransitionPolicy, CREDIT_TOKEN_DOC_TYPE};
pub use runtime::{
    Clock,
    LedgerRuntime,
    SteppingClock,
    SystemClock,
    TransactionContext,
    TransactionReceipt
};
pub use storage_traits::{KeyModification, Version, VersionedValue, WorldState, WriteBatch};
pub use storage::{FileJournal, MemoryWorldState};

// Re-export the storage implementations
#[cfg(feature = "rocksdb")]
pub use storage::RocksDbWorldState;

#[cfg(feature = "sqlite")]
pub use storage::SqliteWorldState;
