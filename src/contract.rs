//! The credit-token asset contract.
//!
//! Sole authority over creating credit tokens, moving them through their
//! status lifecycle and handing them to new owners. Every operation runs
//! inside one [`TransactionContext`]; conflicting writers are resolved by
//! the runtime at commit time, so the contract itself takes no locks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authorization::{AllowAll, Authorizer, Operation};
use crate::canonical::to_canonical_json;
use crate::error::LedgerError;
use crate::events::{ChaincodeEvent, TransferEvent};
use crate::id::{validate_simple_key, TokenId};
use crate::objects::{
    parse_original_value, CreditToken, TokenStatus, TransitionPolicy, CREDIT_TOKEN_DOC_TYPE,
};
use crate::runtime::{create_composite_key, split_composite_key, TransactionContext};

/// Object type of the owner -> token index entries
pub const OWNER_INDEX: &str = "owner~id";

/// Arguments of `Create`, in wire order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCreditToken {
    pub id: String,
    pub owner_id: String,
    /// Decimal face value as supplied by the caller, validated on create
    pub original_value: String,
    pub category: String,
    pub subtype: String,
    pub issuer_name: String,
    #[serde(default)]
    pub metadata_hash: String,
}

/// Value reported for one history entry
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryValue {
    /// The record as stored, decoded as JSON
    Record(Value),
    /// Stored bytes that are not JSON, lossily decoded
    Raw(String),
    /// The key was deleted in this transaction
    Deleted,
}

impl Serialize for HistoryValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HistoryValue::Record(value) => value.serialize(serializer),
            HistoryValue::Raw(raw) => serializer.serialize_str(raw),
            HistoryValue::Deleted => serializer.serialize_str("deleted"),
        }
    }
}

/// One step of a token's audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tx_id: String,
    pub value: HistoryValue,
}

impl HistoryEntry {
    /// The decoded record, if this entry holds one
    pub fn record(&self) -> Option<CreditToken> {
        match &self.value {
            HistoryValue::Record(value) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

pub struct CreditTokenContract {
    authorizer: Box<dyn Authorizer>,
    transitions: TransitionPolicy,
    owner_index: bool,
}

impl Default for CreditTokenContract {
    fn default() -> Self {
        Self {
            authorizer: Box::new(AllowAll),
            transitions: TransitionPolicy::default(),
            owner_index: false,
        }
    }
}

impl std::fmt::Debug for CreditTokenContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditTokenContract")
            .field("transitions", &self.transitions)
            .field("owner_index", &self.owner_index)
            .finish()
    }
}

impl CreditTokenContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Box::new(authorizer);
        self
    }

    pub fn with_transition_policy(mut self, policy: TransitionPolicy) -> Self {
        self.transitions = policy;
        self
    }

    /// Maintain `owner~id` composite keys next to each record.
    ///
    /// Only enable this on an empty ledger or one that always had it enabled;
    /// tokens written without the index are invisible to indexed owner queries.
    pub fn with_owner_index(mut self, enabled: bool) -> Self {
        self.owner_index = enabled;
        self
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        self.transitions
    }

    /// Whether a non-empty record is stored under `id`
    pub fn exists(&self, ctx: &mut TransactionContext<'_>, id: &str) -> Result<bool, LedgerError> {
        Ok(ctx
            .get_state(id)?
            .map_or(false, |value| !value.is_empty()))
    }

    /// Issue a new token in `ACTIVE` status
    pub fn create(
        &self,
        ctx: &mut TransactionContext<'_>,
        request: NewCreditToken,
    ) -> Result<CreditToken, LedgerError> {
        let id = TokenId::parse(&request.id)?;
        validate_simple_key("owner id", &request.owner_id)?;

        if self.exists(ctx, &id)? {
            return Err(LedgerError::AlreadyExists(id.into_inner()));
        }

        let original_value = parse_original_value(&request.original_value)?;

        let token = CreditToken::issue(
            id.into_inner(),
            request.owner_id,
            original_value,
            request.category,
            request.subtype,
            request.issuer_name,
            request.metadata_hash,
            ctx.timestamp(),
        );

        self.authorize(ctx, Operation::Create, &token)?;
        self.put_token(ctx, &token)?;
        if self.owner_index {
            let index_key = create_composite_key(OWNER_INDEX, &[&token.owner_id, &token.id]);
            ctx.put_state(&index_key, vec![0])?;
        }

        log::info!(
            "Issued credit token {} to {} (value {})",
            token.id,
            token.owner_id,
            token.original_value
        );
        Ok(token)
    }

    /// Current record of `id`
    pub fn query(&self, ctx: &mut TransactionContext<'_>, id: &str) -> Result<CreditToken, LedgerError> {
        let bytes = ctx
            .get_state(id)?
            .filter(|value| !value.is_empty())
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        let token: CreditToken = serde_json::from_slice(&bytes)?;
        if !token.is_credit_token() {
            return Err(LedgerError::NotFound(id.to_string()));
        }
        Ok(token)
    }

    /// Move `id` to `new_status`, subject to the transition policy
    pub fn update_status(
        &self,
        ctx: &mut TransactionContext<'_>,
        id: &str,
        new_status: &str,
    ) -> Result<CreditToken, LedgerError> {
        let mut token = self.query(ctx, id)?;
        let new_status: TokenStatus = new_status.parse()?;

        self.transitions.check(token.status, new_status)?;
        self.authorize(ctx, Operation::UpdateStatus, &token)?;

        let previous = token.status;
        token.set_status(new_status, ctx.timestamp());
        self.put_token(ctx, &token)?;

        log::info!("Credit token {} status {} -> {}", token.id, previous, new_status);
        Ok(token)
    }

    /// Hand `id` to `new_owner_id`, reactivating it, and emit `TransferCreditToken`
    pub fn transfer(
        &self,
        ctx: &mut TransactionContext<'_>,
        id: &str,
        new_owner_id: &str,
    ) -> Result<CreditToken, LedgerError> {
        let mut token = self.query(ctx, id)?;
        validate_simple_key("new owner id", new_owner_id)?;

        if token.owner_id == new_owner_id {
            return Err(LedgerError::InvalidArgument(format!(
                "credit token {} is already owned by {}",
                id, new_owner_id
            )));
        }

        self.authorize(ctx, Operation::Transfer, &token)?;

        let old_owner = token.reassign(new_owner_id.to_string(), ctx.timestamp());
        self.put_token(ctx, &token)?;

        if self.owner_index {
            ctx.del_state(&create_composite_key(OWNER_INDEX, &[&old_owner, &token.id]))?;
            ctx.put_state(
                &create_composite_key(OWNER_INDEX, &[&token.owner_id, &token.id]),
                vec![0],
            )?;
        }

        let event = TransferEvent {
            old_owner,
            new_owner: token.owner_id.clone(),
            token_id: token.id.clone(),
            timestamp: token.updated_at,
        };
        let event = ChaincodeEvent::transfer(ctx.tx_id(), &event)?;
        ctx.set_event(event);

        log::info!("Transferred credit token {} to {}", token.id, token.owner_id);
        Ok(token)
    }

    /// Every credit token in world state, in key order.
    ///
    /// Records of other document types are ignored; records that do not parse
    /// are logged and skipped.
    pub fn query_all(&self, ctx: &mut TransactionContext<'_>) -> Result<Vec<CreditToken>, LedgerError> {
        let mut tokens = Vec::new();

        for entry in ctx.get_state_by_range("", "") {
            let (key, bytes) = entry?;
            if let Some(token) = decode_credit_token(&key, &bytes) {
                tokens.push(token);
            }
        }

        Ok(tokens)
    }

    /// The subset of `query_all` held by `owner_id`
    pub fn query_by_owner(
        &self,
        ctx: &mut TransactionContext<'_>,
        owner_id: &str,
    ) -> Result<Vec<CreditToken>, LedgerError> {
        if !self.owner_index {
            let mut tokens = self.query_all(ctx)?;
            tokens.retain(|token| token.owner_id == owner_id);
            return Ok(tokens);
        }

        // Index keys are ordered by id within one owner, matching the full-scan order
        let index_keys: Vec<String> = ctx
            .get_state_by_partial_composite_key(OWNER_INDEX, &[owner_id])
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<_, _>>()?;

        let mut tokens = Vec::with_capacity(index_keys.len());
        for index_key in index_keys {
            let id = match split_composite_key(&index_key) {
                Some((_, attributes)) if attributes.len() == 2 => attributes[1].clone(),
                _ => {
                    log::warn!("Skipping malformed owner index key {:?}", index_key);
                    continue;
                }
            };
            if let Some(bytes) = ctx.get_state(&id)? {
                if let Some(token) = decode_credit_token(&id, &bytes) {
                    if token.owner_id == owner_id {
                        tokens.push(token);
                    }
                }
            }
        }

        Ok(tokens)
    }

    /// Audit trail of `id`, oldest first
    pub fn get_history(
        &self,
        ctx: &mut TransactionContext<'_>,
        id: &str,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        ctx.get_history_for_key(id)
            .map(|modification| {
                let modification = modification?;
                let value = match modification.value {
                    None => HistoryValue::Deleted,
                    Some(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                        Ok(value) => HistoryValue::Record(value),
                        Err(_) => HistoryValue::Raw(String::from_utf8_lossy(&bytes).into_owned()),
                    },
                };
                Ok(HistoryEntry {
                    timestamp: modification.timestamp,
                    tx_id: modification.tx_id,
                    value,
                })
            })
            .collect()
    }

    fn authorize(
        &self,
        ctx: &TransactionContext<'_>,
        operation: Operation,
        token: &CreditToken,
    ) -> Result<(), LedgerError> {
        if self.authorizer.can_perform(ctx.creator(), operation, token) {
            Ok(())
        } else {
            log::warn!("{} denied {:?} on credit token {}", ctx.creator(), operation, token.id);
            Err(LedgerError::Unauthorized(format!(
                "{} may not perform {:?} on credit token {}",
                ctx.creator(),
                operation,
                token.id
            )))
        }
    }

    fn put_token(&self, ctx: &mut TransactionContext<'_>, token: &CreditToken) -> Result<(), LedgerError> {
        let bytes = to_canonical_json(token)?;
        ctx.put_state(&token.id, bytes)?;
        Ok(())
    }
}

/// Decode a scanned record, keeping only credit tokens
fn decode_credit_token(key: &str, bytes: &[u8]) -> Option<CreditToken> {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Skipping unparseable record {:?}: {}", key, e);
            return None;
        }
    };

    if value.get("docType").and_then(Value::as_str) != Some(CREDIT_TOKEN_DOC_TYPE) {
        return None;
    }

    match serde_json::from_value(value) {
        Ok(token) => Some(token),
        Err(e) => {
            log::warn!("Skipping malformed credit token {:?}: {}", key, e);
            None
        }
    }
}
