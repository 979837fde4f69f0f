use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::canonical::to_canonical_json;
use crate::error::StorageError;

/// Name of the event emitted on every ownership change
pub const TRANSFER_EVENT_NAME: &str = "TransferCreditToken";

/// Payload of `TransferCreditToken`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub old_owner: String,
    pub new_owner: String,
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A named event with a canonical JSON payload, attached to one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub name: String,
    pub tx_id: String,
    pub payload: Vec<u8>,
}

impl ChaincodeEvent {
    pub fn transfer(tx_id: &str, event: &TransferEvent) -> Result<Self, StorageError> {
        Ok(Self {
            name: TRANSFER_EVENT_NAME.to_string(),
            tx_id: tx_id.to_string(),
            payload: to_canonical_json(event)?,
        })
    }

    /// Decode the payload of a `TransferCreditToken` event
    pub fn as_transfer(&self) -> Option<TransferEvent> {
        if self.name != TRANSFER_EVENT_NAME {
            return None;
        }
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Receives the event of every committed transaction
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ChaincodeEvent);
}

/// Keeps published events in memory, in commit order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ChaincodeEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<ChaincodeEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Take and clear the recorded events
    pub fn drain(&self) -> Vec<ChaincodeEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    pub fn transfers(&self) -> Vec<TransferEvent> {
        self.events()
            .iter()
            .filter_map(ChaincodeEvent::as_transfer)
            .collect()
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: &ChaincodeEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(e) => log::error!("Dropping event {} from tx {}: {}", event.name, event.tx_id, e),
        }
    }
}
