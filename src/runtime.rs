use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::authorization::Identity;
use crate::error::{LedgerError, StorageError};
use crate::events::{ChaincodeEvent, EventSink};
use crate::id::{TxId, COMPOSITE_KEY_NAMESPACE};
use crate::storage_traits::{KeyModification, Version, WorldState, WriteBatch};

/// Lowest simple key; an empty range start is replaced by it so that full
/// scans never reach into the composite key space
const SIMPLE_KEY_FLOOR: &str = "\u{1}";

/// Source of transaction timestamps
pub trait Clock: Send + Sync {
    /// Timestamp for a transaction that will be submitted
    fn now(&self) -> DateTime<Utc>;

    /// The time `now` would return, without consuming it; used by queries
    fn peek(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn peek(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock: returns `start`, then `start + step`, and so on.
/// Replicas sharing one configuration derive identical timestamps.
#[derive(Debug)]
pub struct SteppingClock {
    next: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        match self.next.lock() {
            Ok(mut next) => {
                let current = *next;
                *next = current + self.step;
                current
            }
            // A poisoned clock still hands out a usable time
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn peek(&self) -> DateTime<Utc> {
        match self.next.lock() {
            Ok(next) => *next,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Build a composite key: namespace byte, object type, then each attribute,
/// every component terminated by the namespace byte
pub fn create_composite_key(object_type: &str, attributes: &[&str]) -> String {
    let mut key = String::new();
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(object_type);
    key.push(COMPOSITE_KEY_NAMESPACE);
    for attribute in attributes {
        key.push_str(attribute);
        key.push(COMPOSITE_KEY_NAMESPACE);
    }
    key
}

/// Inverse of `create_composite_key`
pub fn split_composite_key(key: &str) -> Option<(String, Vec<String>)> {
    let rest = key.strip_prefix(COMPOSITE_KEY_NAMESPACE)?;
    let mut components: Vec<String> = rest
        .split(COMPOSITE_KEY_NAMESPACE)
        .map(str::to_string)
        .collect();

    // A well formed key ends with the separator, leaving an empty tail
    if components.pop().as_deref() != Some("") || components.is_empty() {
        return None;
    }
    let object_type = components.remove(0);
    Some((object_type, components))
}

/// What a transaction did once it committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// The id of the transaction that was executed
    pub tx_id: TxId,

    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,

    /// Height the writes landed at; the current height if nothing was written
    pub version: Version,

    /// Number of keys written
    pub writes: usize,

    /// Name of the event published on commit, if any
    pub event: Option<String>,
}

/// The view a contract operation has of the ledger while it executes.
///
/// Reads come from committed state and are recorded with their version; writes
/// and the event are staged and only take effect when the runtime commits.
pub struct TransactionContext<'a> {
    store: &'a dyn WorldState,
    tx_id: TxId,
    timestamp: DateTime<Utc>,
    creator: Identity,
    reads: BTreeMap<String, Option<Version>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
    event: Option<ChaincodeEvent>,
}

impl<'a> TransactionContext<'a> {
    pub fn new(
        store: &'a dyn WorldState,
        tx_id: TxId,
        timestamp: DateTime<Utc>,
        creator: Identity,
    ) -> Self {
        Self {
            store,
            tx_id,
            timestamp,
            creator,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            event: None,
        }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn creator(&self) -> &Identity {
        &self.creator
    }

    /// Committed value of `key`; the observed version joins the read set
    pub fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let stored = self.store.get_state(key)?;
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| stored.as_ref().map(|v| v.version));
        Ok(stored.map(|v| v.value))
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::Other("Key must not be empty".to_string()));
        }
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    /// Stage a delete; history keeps a tombstone
    pub fn del_state(&mut self, key: &str) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::Other("Key must not be empty".to_string()));
        }
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    /// Committed simple keys in `[start, end)`; `""` leaves a bound open
    pub fn get_state_by_range(
        &self,
        start: &str,
        end: &str,
    ) -> Box<dyn Iterator<Item = Result<(String, Vec<u8>), StorageError>> + 'a> {
        let start = if start.is_empty() { SIMPLE_KEY_FLOOR } else { start };
        Box::new(self.store.scan_range(start, end))
    }

    /// Committed composite keys of `object_type` whose leading attributes match `attributes`
    pub fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Box<dyn Iterator<Item = Result<(String, Vec<u8>), StorageError>> + 'a> {
        let start = create_composite_key(object_type, attributes);
        let mut end = start.clone();
        end.push(char::MAX);
        Box::new(self.store.scan_range(&start, &end))
    }

    pub fn get_history_for_key(
        &self,
        key: &str,
    ) -> Box<dyn Iterator<Item = Result<KeyModification, StorageError>> + 'a> {
        Box::new(self.store.history_for_key(key))
    }

    /// Attach the transaction's event; a later call replaces an earlier one
    pub fn set_event(&mut self, event: ChaincodeEvent) {
        self.event = Some(event);
    }

    fn into_parts(self) -> (WriteBatch, Option<ChaincodeEvent>) {
        let batch = WriteBatch {
            tx_id: self.tx_id.to_string(),
            timestamp: self.timestamp,
            reads: self.reads.into_iter().collect(),
            writes: self.writes.into_iter().collect(),
        };
        (batch, self.event)
    }
}

#[derive(Debug, Clone, Copy)]
enum TxKind {
    Submit,
    Evaluate,
}

impl TxKind {
    fn as_bytes(&self) -> &'static [u8] {
        match self {
            TxKind::Submit => b"submit",
            TxKind::Evaluate => b"evaluate",
        }
    }
}

/// Executes contract calls as all-or-nothing transactions against a world state
pub struct LedgerRuntime {
    store: Arc<dyn WorldState>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    nonce: AtomicU64,
}

impl LedgerRuntime {
    pub fn new(store: Arc<dyn WorldState>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            clock: Arc::new(SystemClock),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn WorldState> {
        &self.store
    }

    /// Queries observe the clock and nonce without advancing them, so replicas
    /// that served different queries still stamp the same submitted transactions
    fn begin(
        &self,
        kind: TxKind,
        creator: &Identity,
        function: &str,
        args: &[&str],
    ) -> TransactionContext<'_> {
        let (timestamp, nonce) = match kind {
            TxKind::Submit => (self.clock.now(), self.nonce.fetch_add(1, Ordering::SeqCst)),
            TxKind::Evaluate => (self.clock.peek(), self.nonce.load(Ordering::SeqCst)),
        };
        let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let nonce_bytes = nonce.to_le_bytes();

        let mut seeds: Vec<&[u8]> = vec![
            kind.as_bytes(),
            function.as_bytes(),
            creator.msp_id.as_bytes(),
            creator.subject.as_bytes(),
            stamp.as_bytes(),
            &nonce_bytes,
        ];
        seeds.extend(args.iter().map(|arg| arg.as_bytes()));

        TransactionContext::new(
            self.store.as_ref(),
            TxId::derive(&seeds),
            timestamp,
            creator.clone(),
        )
    }

    /// Run `f` and commit what it staged. On any error nothing is written and no event is published.
    pub fn submit<T, F>(
        &self,
        creator: &Identity,
        function: &str,
        args: &[&str],
        f: F,
    ) -> Result<(T, TransactionReceipt), LedgerError>
    where
        F: FnOnce(&mut TransactionContext<'_>) -> Result<T, LedgerError>,
    {
        let mut ctx = self.begin(TxKind::Submit, creator, function, args);
        let output = match f(&mut ctx) {
            Ok(output) => output,
            Err(e) => {
                log::debug!("{} tx {} rejected: {}", function, ctx.tx_id(), e);
                return Err(e);
            }
        };

        let (batch, event) = ctx.into_parts();
        let version = if batch.is_empty() {
            self.store.height()?
        } else {
            self.store.commit(&batch).map_err(|e| {
                log::warn!("{} tx {} failed to commit: {}", function, batch.tx_id, e);
                LedgerError::from(e)
            })?
        };

        if let Some(event) = &event {
            self.events.publish(event);
        }

        let receipt = TransactionReceipt {
            tx_id: TxId::from(batch.tx_id.clone()),
            timestamp: batch.timestamp,
            version,
            writes: batch.writes.len(),
            event: event.map(|e| e.name),
        };
        log::info!(
            "{} tx {} committed at height {}",
            function,
            receipt.tx_id,
            receipt.version
        );

        Ok((output, receipt))
    }

    /// Run `f` as a query: staged writes and events are discarded
    pub fn evaluate<T, F>(
        &self,
        creator: &Identity,
        function: &str,
        args: &[&str],
        f: F,
    ) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut TransactionContext<'_>) -> Result<T, LedgerError>,
    {
        let mut ctx = self.begin(TxKind::Evaluate, creator, function, args);
        f(&mut ctx)
    }
}
