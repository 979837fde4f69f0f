//! Client-facing ledger: one contract bound to one world state.
//!
//! Typed methods for embedding callers, plus the chaincode-style
//! `invoke(function, args)` dispatcher that peers expose to clients.

use std::sync::Arc;

use crate::authorization::{Identity, OwnershipPolicy};
use crate::canonical::{state_digest, to_canonical_json};
use crate::config::{ConfigError, LedgerConfig};
use crate::contract::{CreditTokenContract, HistoryEntry, NewCreditToken};
use crate::error::{LedgerError, StorageError};
use crate::events::{ChaincodeEvent, EventLog};
use crate::objects::CreditToken;
use crate::runtime::{Clock, LedgerRuntime, TransactionReceipt};
use crate::storage::WorldState;

pub struct CreditLedger {
    runtime: LedgerRuntime,
    contract: CreditTokenContract,
    events: Arc<EventLog>,
}

impl CreditLedger {
    /// Assemble a ledger from an already opened store
    pub fn new(store: Arc<dyn WorldState>, contract: CreditTokenContract) -> Self {
        let events = Arc::new(EventLog::new());
        let runtime = LedgerRuntime::new(store, events.clone());
        Self {
            runtime,
            contract,
            events,
        }
    }

    /// Open the configured backend and build the contract the configuration describes
    pub fn from_config(config: &LedgerConfig) -> Result<Self, ConfigError> {
        let store = config.open_world_state()?;

        let mut contract = CreditTokenContract::new()
            .with_transition_policy(config.transition_policy)
            .with_owner_index(config.owner_index);
        if let Some(msp) = &config.issuer_msp {
            contract = contract.with_authorizer(OwnershipPolicy::new(Some(msp.clone())));
        }

        log::info!(
            "Opened credit ledger at height {} ({:?} transitions, owner index {})",
            store.height()?,
            config.transition_policy,
            config.owner_index
        );
        Ok(Self::new(store, contract))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.runtime = self.runtime.with_clock(clock);
        self
    }

    pub fn contract(&self) -> &CreditTokenContract {
        &self.contract
    }

    pub fn store(&self) -> &Arc<dyn WorldState> {
        self.runtime.store()
    }

    /// Events published by committed transactions, in commit order
    pub fn events(&self) -> Vec<ChaincodeEvent> {
        self.events.events()
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn exists(&self, identity: &Identity, id: &str) -> Result<bool, LedgerError> {
        self.runtime
            .evaluate(identity, "Exists", &[id], |ctx| self.contract.exists(ctx, id))
    }

    pub fn create(
        &self,
        identity: &Identity,
        request: NewCreditToken,
    ) -> Result<TransactionReceipt, LedgerError> {
        let args = [
            request.id.as_str(),
            request.owner_id.as_str(),
            request.original_value.as_str(),
            request.category.as_str(),
            request.subtype.as_str(),
            request.issuer_name.as_str(),
            request.metadata_hash.as_str(),
        ];

        self.runtime
            .submit(identity, "Create", &args, |ctx| {
                self.contract.create(ctx, request.clone())
            })
            .map(|(_, receipt)| receipt)
    }

    pub fn query(&self, identity: &Identity, id: &str) -> Result<CreditToken, LedgerError> {
        self.runtime
            .evaluate(identity, "Query", &[id], |ctx| self.contract.query(ctx, id))
    }

    pub fn update_status(
        &self,
        identity: &Identity,
        id: &str,
        new_status: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.runtime
            .submit(identity, "UpdateStatus", &[id, new_status], |ctx| {
                self.contract.update_status(ctx, id, new_status)
            })
            .map(|(_, receipt)| receipt)
    }

    pub fn transfer(
        &self,
        identity: &Identity,
        id: &str,
        new_owner_id: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.runtime
            .submit(identity, "Transfer", &[id, new_owner_id], |ctx| {
                self.contract.transfer(ctx, id, new_owner_id)
            })
            .map(|(_, receipt)| receipt)
    }

    pub fn query_all(&self, identity: &Identity) -> Result<Vec<CreditToken>, LedgerError> {
        self.runtime
            .evaluate(identity, "QueryAll", &[], |ctx| self.contract.query_all(ctx))
    }

    pub fn query_by_owner(
        &self,
        identity: &Identity,
        owner_id: &str,
    ) -> Result<Vec<CreditToken>, LedgerError> {
        self.runtime
            .evaluate(identity, "QueryByOwner", &[owner_id], |ctx| {
                self.contract.query_by_owner(ctx, owner_id)
            })
    }

    pub fn get_history(&self, identity: &Identity, id: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        self.runtime
            .evaluate(identity, "GetHistory", &[id], |ctx| self.contract.get_history(ctx, id))
    }

    /// Dispatch a contract call by name.
    ///
    /// Mutations return an empty payload once committed; queries return their
    /// result as canonical JSON (`Exists` returns `true` or `false`).
    pub fn invoke(&self, identity: &Identity, function: &str, args: &[&str]) -> Result<Vec<u8>, LedgerError> {
        match (function, args) {
            ("Exists", [id]) => Ok(self.exists(identity, id)?.to_string().into_bytes()),
            ("Create", [id, owner_id, original_value, category, subtype, issuer_name, rest @ ..])
                if rest.len() <= 1 =>
            {
                let request = NewCreditToken {
                    id: id.to_string(),
                    owner_id: owner_id.to_string(),
                    original_value: original_value.to_string(),
                    category: category.to_string(),
                    subtype: subtype.to_string(),
                    issuer_name: issuer_name.to_string(),
                    metadata_hash: rest.first().map(|hash| hash.to_string()).unwrap_or_default(),
                };
                self.create(identity, request)?;
                Ok(Vec::new())
            }
            ("Query", [id]) => Ok(to_canonical_json(&self.query(identity, id)?)?),
            ("UpdateStatus", [id, status]) => {
                self.update_status(identity, id, status)?;
                Ok(Vec::new())
            }
            ("Transfer", [id, new_owner_id]) => {
                self.transfer(identity, id, new_owner_id)?;
                Ok(Vec::new())
            }
            ("QueryAll", []) => Ok(to_canonical_json(&self.query_all(identity)?)?),
            ("QueryByOwner", [owner_id]) => {
                Ok(to_canonical_json(&self.query_by_owner(identity, owner_id)?)?)
            }
            ("GetHistory", [id]) => Ok(to_canonical_json(&self.get_history(identity, id)?)?),
            (
                "Exists" | "Create" | "Query" | "UpdateStatus" | "Transfer" | "QueryAll"
                | "QueryByOwner" | "GetHistory",
                _,
            ) => Err(LedgerError::InvalidArgument(format!(
                "{} called with {} arguments",
                function,
                args.len()
            ))),
            _ => Err(LedgerError::InvalidArgument(format!(
                "unknown function {:?}",
                function
            ))),
        }
    }

    /// Hex BLAKE3 digest of the whole committed world state.
    ///
    /// Two replicas that applied the same transactions report the same digest.
    pub fn state_digest(&self) -> Result<String, StorageError> {
        let entries = self
            .store()
            .scan_range("", "")
            .collect::<Result<Vec<(String, Vec<u8>)>, StorageError>>()?;
        let digest = state_digest(
            entries
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_slice())),
        );
        Ok(hex::encode(digest))
    }
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditLedger")
            .field("contract", &self.contract)
            .finish()
    }
}
