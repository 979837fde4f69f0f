use serde::{Deserialize, Serialize};
use std::fmt;

use crate::objects::CreditToken;

/// The submitting client as reported by the host ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Membership service provider (organization) of the client
    pub msp_id: String,
    /// Client id within the organization; compared against `ownerId`
    pub subject: String,
}

impl Identity {
    pub fn new(msp_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            msp_id: msp_id.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.msp_id, self.subject)
    }
}

/// Mutating contract operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    UpdateStatus,
    Transfer,
}

/// Decides whether an identity may perform a mutation.
///
/// Called before any write is staged. `record` is the current token for
/// `UpdateStatus` and `Transfer`, and the token about to be issued for `Create`.
pub trait Authorizer: Send + Sync {
    fn can_perform(&self, identity: &Identity, operation: Operation, record: &CreditToken) -> bool;
}

/// Allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn can_perform(&self, _identity: &Identity, _operation: Operation, _record: &CreditToken) -> bool {
        true
    }
}

/// Only the issuing organization may create, only the current owner may
/// transfer or change status.
#[derive(Debug, Clone)]
pub struct OwnershipPolicy {
    issuer_msp: Option<String>,
}

impl OwnershipPolicy {
    /// `issuer_msp = None` lets any organization create tokens
    pub fn new(issuer_msp: Option<String>) -> Self {
        Self { issuer_msp }
    }
}

impl Authorizer for OwnershipPolicy {
    fn can_perform(&self, identity: &Identity, operation: Operation, record: &CreditToken) -> bool {
        match operation {
            Operation::Create => self
                .issuer_msp
                .as_deref()
                .map_or(true, |msp| msp == identity.msp_id),
            Operation::UpdateStatus | Operation::Transfer => identity.subject == record.owner_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn token(owner: &str) -> CreditToken {
        CreditToken::issue(
            "T1".into(),
            owner.into(),
            10.0,
            "TRIBUTARIO".into(),
            "ICMS".into(),
            "Receita".into(),
            String::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_allow_all() {
        let anyone = Identity::new("Org9MSP", "mallory");
        for op in [Operation::Create, Operation::UpdateStatus, Operation::Transfer] {
            assert!(AllowAll.can_perform(&anyone, op, &token("alice")));
        }
    }

    #[test]
    fn test_ownership_policy() {
        let policy = OwnershipPolicy::new(Some("IssuerMSP".into()));
        let issuer = Identity::new("IssuerMSP", "clerk");
        let alice = Identity::new("BankMSP", "alice");

        assert!(policy.can_perform(&issuer, Operation::Create, &token("alice")));
        assert!(!policy.can_perform(&alice, Operation::Create, &token("alice")));

        assert!(policy.can_perform(&alice, Operation::Transfer, &token("alice")));
        assert!(!policy.can_perform(&issuer, Operation::Transfer, &token("alice")));
        assert!(!policy.can_perform(&alice, Operation::UpdateStatus, &token("bob")));
    }

    #[test]
    fn test_open_issuance() {
        let policy = OwnershipPolicy::new(None);
        assert!(policy.can_perform(&Identity::new("AnyMSP", "x"), Operation::Create, &token("y")));
    }
}
