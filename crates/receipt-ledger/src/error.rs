//! Ledger and builder error types.

use receipt_crypto::KeyError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("chain violation: expected previous hash {expected}, got {found}")]
    ChainViolation { expected: String, found: String },

    #[error("integrity violation on certificate {id}: {reason}")]
    IntegrityViolation { id: Uuid, reason: String },

    #[error("ledger persistence failed: {0}")]
    Persist(#[source] std::io::Error),

    #[error("ledger file is unreadable: {0}")]
    Corrupt(String),

    #[error("unsupported ledger format version {0}")]
    UnsupportedVersion(u32),
}

/// Any failure here means the action was not certified.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("certificate issuance locked down: {0}")]
    Lockdown(String),

    #[error("{field} {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
