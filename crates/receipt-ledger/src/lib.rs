//! Receipt Ledger — signed, hash-chained execution certificates.
//!
//! The [`CertificateBuilder`] seals the plaintext description of an
//! approved action into an [`ExecutionCertificate`]: sensitive fields are
//! hashed, the canonical payload is signed by the device key, and the
//! result is linked to the previous certificate by content hash. The
//! [`CertificateLedger`] is the single writer of that chain and offers
//! verification, inclusion proofs and audit export.
//!
//! ```text
//! CertificateInput ──▶ CertificateBuilder ──append_with──▶ CertificateLedger
//!                          │        ▲                          │
//!                          ▼        │ head hash                ▼
//!                   DeviceKeyManager                    certificates.json
//! ```

pub mod audit;
pub mod builder;
pub mod canonical;
pub mod certificate;
pub mod error;
pub mod export;
pub mod ledger;
pub mod policy;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::{AuditEvent, AuditSink};
pub use builder::CertificateBuilder;
pub use canonical::GENESIS;
pub use certificate::{
    AuthorizationToken, CertificateInput, ExecutionCertificate, ExecutionResult, Intent,
    Proposal, ResultStatus, RiskTier,
};
pub use error::{BuildError, LedgerError};
pub use export::{AuditExportBundle, ExportVerification};
pub use ledger::{CertificateLedger, ChainReport};
pub use policy::PolicySnapshot;
