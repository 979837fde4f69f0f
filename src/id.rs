use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;

use crate::error::LedgerError;

/// First byte of every composite key and separator between its components.
/// Simple keys and composite key attributes may not contain it.
pub const COMPOSITE_KEY_NAMESPACE: char = '\u{0}';

// TokenId is the world-state key of a credit token.
// It is chosen by the issuer and stays stable for the lifetime of the asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl Deref for TokenId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TokenId {
    /// Validate and wrap a caller supplied id
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        validate_simple_key("token id", raw)?;
        Ok(TokenId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Reject empty identifiers and identifiers containing the composite key
/// separator. Ids and owner ids also become `owner~id` index attributes, where
/// an embedded separator would split one attribute into two.
pub fn validate_simple_key(what: &str, raw: &str) -> Result<(), LedgerError> {
    if raw.is_empty() {
        return Err(LedgerError::InvalidArgument(format!("{what} must not be empty")));
    }
    if raw.contains(COMPOSITE_KEY_NAMESPACE) {
        return Err(LedgerError::InvalidArgument(format!(
            "{what} must not contain the composite key separator U+0000"
        )));
    }
    Ok(())
}

// TxId identifies one submitted or evaluated transaction.
// It is the hex encoded SHA-256 over a domain separator and the invocation seeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl Deref for TxId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TxId {
    pub fn create_tx_id(seeds: &[&[u8]]) -> [u8; 32] {
        let mut hasher = Sha256::new();

        // Domain separator
        hasher.update(b"CREDIT_LEDGER_Tx");

        // Length-prefix every seed so ("ab", "c") and ("a", "bc") differ
        for seed in seeds {
            hasher.update((seed.len() as u64).to_le_bytes());
            hasher.update(seed);
        }

        hasher.finalize().into()
    }

    pub fn derive(seeds: &[&[u8]]) -> Self {
        TxId(hex::encode(Self::create_tx_id(seeds)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TxId {
    fn from(raw: String) -> Self {
        TxId(raw)
    }
}
