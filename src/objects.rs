use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Discriminator stored on every credit-token record
pub const CREDIT_TOKEN_DOC_TYPE: &str = "CreditToken";

/// Lifecycle status of a credit token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    /// Reserved for a draft phase; creation goes straight to `Active`
    Created,
    /// Usable by its holder
    Active,
    /// Offered for sale; only settles back to `Active` or on to `Transferred`
    LockedSale,
    /// Settled to another holder; terminal
    Transferred,
    /// Consumed; terminal
    Burned,
}

impl TokenStatus {
    pub const ALL: [TokenStatus; 5] = [
        TokenStatus::Created,
        TokenStatus::Active,
        TokenStatus::LockedSale,
        TokenStatus::Transferred,
        TokenStatus::Burned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Created => "CREATED",
            TokenStatus::Active => "ACTIVE",
            TokenStatus::LockedSale => "LOCKED_SALE",
            TokenStatus::Transferred => "TRANSFERRED",
            TokenStatus::Burned => "BURNED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenStatus::Transferred | TokenStatus::Burned)
    }

    /// Whether the transition table allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: TokenStatus) -> bool {
        match self {
            TokenStatus::Transferred | TokenStatus::Burned => false,
            TokenStatus::LockedSale => {
                matches!(next, TokenStatus::Active | TokenStatus::Transferred)
            }
            TokenStatus::Created | TokenStatus::Active => true,
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                LedgerError::InvalidArgument(format!(
                    "invalid status {s:?}, expected one of CREATED, ACTIVE, LOCKED_SALE, TRANSFERRED, BURNED"
                ))
            })
    }
}

/// How strictly UpdateStatus honours the transition table.
///
/// Transfer is not governed by it: a transfer reactivates the token from any status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Reject moves the table forbids
    #[default]
    Enforced,
    /// Any status may move to any other status
    Permissive,
}

impl TransitionPolicy {
    pub fn check(&self, from: TokenStatus, to: TokenStatus) -> Result<(), LedgerError> {
        match self {
            TransitionPolicy::Permissive => Ok(()),
            TransitionPolicy::Enforced if from.can_transition_to(to) => Ok(()),
            TransitionPolicy::Enforced => Err(LedgerError::InvalidTransition { from, to }),
        }
    }
}

/// A tokenized tax-credit title as persisted in world state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditToken {
    pub id: String,
    pub owner_id: String,
    pub original_value: f64,
    pub category: String,
    pub subtype: String,
    pub issuer_name: String,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Integrity pointer to off-ledger metadata, possibly empty
    #[serde(default)]
    pub metadata_hash: String,
    pub doc_type: String,
}

impl CreditToken {
    /// Build a freshly issued token; status starts at `Active`
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        id: String,
        owner_id: String,
        original_value: f64,
        category: String,
        subtype: String,
        issuer_name: String,
        metadata_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            original_value,
            category,
            subtype,
            issuer_name,
            status: TokenStatus::Active,
            created_at: now,
            updated_at: now,
            metadata_hash,
            doc_type: CREDIT_TOKEN_DOC_TYPE.to_string(),
        }
    }

    pub fn is_credit_token(&self) -> bool {
        self.doc_type == CREDIT_TOKEN_DOC_TYPE
    }

    /// Refresh `updated_at`, never letting it stand still or go backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
    }

    pub fn set_status(&mut self, status: TokenStatus, now: DateTime<Utc>) {
        self.status = status;
        self.touch(now);
    }

    /// Hand the token to a new holder and reactivate it; returns the previous owner
    pub fn reassign(&mut self, new_owner: String, now: DateTime<Utc>) -> String {
        let previous = std::mem::replace(&mut self.owner_id, new_owner);
        self.status = TokenStatus::Active;
        self.touch(now);
        previous
    }
}

/// Parse the decimal face value supplied at creation
pub fn parse_original_value(raw: &str) -> Result<f64, LedgerError> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        LedgerError::InvalidArgument(format!("original value {raw:?} is not a number"))
    })?;

    if !value.is_finite() || value <= 0.0 {
        return Err(LedgerError::InvalidArgument(format!(
            "original value must be a positive finite number, got {raw:?}"
        )));
    }

    Ok(value)
}
