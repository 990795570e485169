//! Certificate data model.
//!
//! [`CertificateInput`] carries the plaintext description of an approved
//! action and lives only for one build call. [`ExecutionCertificate`] is
//! the sealed, persisted record: sensitive content appears only as
//! SHA-256 digests and no field changes after construction.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use receipt_common::encoding::base64_bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::{self, SignedFields};

/// Risk classification assigned by the authorization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown risk tier: {other}")),
        }
    }
}

/// Outcome of the executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
    Partial,
    RolledBack,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "partial" => Ok(Self::Partial),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(format!("unknown result status: {other}")),
        }
    }
}

/// What the action set out to do.
#[derive(Clone)]
pub struct Intent {
    pub action: String,
    pub target: String,
}

/// The plan that was approved.
#[derive(Clone)]
pub struct Proposal {
    pub summary: String,
    pub step_count: u32,
}

/// The already-approved authorization token from the decision engine.
#[derive(Clone)]
pub struct AuthorizationToken {
    pub token_id: String,
    pub proposal_id: String,
    pub signature: String,
}

/// What happened when the action ran.
#[derive(Clone)]
pub struct ExecutionResult {
    pub status: ResultStatus,
    pub summary: String,
}

/// Plaintext description of an authorized action. Never persisted.
#[derive(Clone)]
pub struct CertificateInput {
    pub intent: Intent,
    pub proposal: Proposal,
    pub authorization: AuthorizationToken,
    pub approver_id: String,
    pub risk_tier: RiskTier,
    pub connector_id: Option<String>,
    pub connector_version: Option<String>,
    pub result: ExecutionResult,
}

// Plaintext must not reach logs through a stray `{:?}`.
impl fmt::Debug for CertificateInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateInput")
            .field("risk_tier", &self.risk_tier)
            .field("connector_id", &self.connector_id)
            .field("connector_version", &self.connector_version)
            .finish_non_exhaustive()
    }
}

/// Digests of every sensitive input field plus the plaintext metadata.
pub(crate) struct HashedInput {
    pub intent_hash: String,
    pub proposal_hash: String,
    pub authorization_token_hash: String,
    pub approver_id_hash: String,
    pub result_hash: String,
    pub risk_tier: RiskTier,
    pub connector_id: Option<String>,
    pub connector_version: Option<String>,
}

impl From<CertificateInput> for HashedInput {
    fn from(input: CertificateInput) -> Self {
        Self {
            intent_hash: canonical::hash_intent(&input.intent.action, &input.intent.target),
            proposal_hash: canonical::hash_proposal(
                &input.proposal.summary,
                input.proposal.step_count,
            ),
            authorization_token_hash: canonical::hash_authorization(
                &input.authorization.token_id,
                &input.authorization.proposal_id,
                &input.authorization.signature,
            ),
            approver_id_hash: canonical::hash_approver(&input.approver_id),
            result_hash: canonical::hash_result(input.result.status, &input.result.summary),
            risk_tier: input.risk_tier,
            connector_id: input.connector_id,
            connector_version: input.connector_version,
        }
    }
}

/// A sealed, signed execution certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCertificate {
    pub(crate) id: Uuid,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) intent_hash: String,
    pub(crate) proposal_hash: String,
    pub(crate) authorization_token_hash: String,
    pub(crate) approver_id_hash: String,
    pub(crate) result_hash: String,
    pub(crate) device_key_id: String,
    #[serde(default)]
    pub(crate) connector_id: Option<String>,
    #[serde(default)]
    pub(crate) connector_version: Option<String>,
    pub(crate) risk_tier: RiskTier,
    pub(crate) policy_snapshot_hash: String,
    #[serde(with = "base64_bytes")]
    pub(crate) signature: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub(crate) signer_public_key: Vec<u8>,
    pub(crate) enclave_backed: bool,
    pub(crate) certificate_hash: String,
    pub(crate) previous_certificate_hash: String,
}

impl ExecutionCertificate {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn intent_hash(&self) -> &str {
        &self.intent_hash
    }

    pub fn proposal_hash(&self) -> &str {
        &self.proposal_hash
    }

    pub fn authorization_token_hash(&self) -> &str {
        &self.authorization_token_hash
    }

    pub fn approver_id_hash(&self) -> &str {
        &self.approver_id_hash
    }

    pub fn result_hash(&self) -> &str {
        &self.result_hash
    }

    pub fn device_key_id(&self) -> &str {
        &self.device_key_id
    }

    pub fn connector_id(&self) -> Option<&str> {
        self.connector_id.as_deref()
    }

    pub fn connector_version(&self) -> Option<&str> {
        self.connector_version.as_deref()
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn policy_snapshot_hash(&self) -> &str {
        &self.policy_snapshot_hash
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn signer_public_key(&self) -> &[u8] {
        &self.signer_public_key
    }

    /// Whether the signing key was hardware-resident.
    ///
    /// Outside the signed payload and the content hash. A `true` value is
    /// only honoured by verification when this device's secure element
    /// attests the signer key.
    pub fn enclave_backed(&self) -> bool {
        self.enclave_backed
    }

    pub fn certificate_hash(&self) -> &str {
        &self.certificate_hash
    }

    pub fn previous_certificate_hash(&self) -> &str {
        &self.previous_certificate_hash
    }

    /// `true` for the first record of a ledger.
    pub fn is_genesis(&self) -> bool {
        self.previous_certificate_hash == canonical::GENESIS
    }

    /// View over the fields covered by the signature.
    pub fn signed_fields(&self) -> SignedFields<'_> {
        SignedFields {
            id: self.id,
            timestamp: self.timestamp,
            intent_hash: &self.intent_hash,
            proposal_hash: &self.proposal_hash,
            authorization_token_hash: &self.authorization_token_hash,
            approver_id_hash: &self.approver_id_hash,
            device_key_id: &self.device_key_id,
            connector_id: self.connector_id.as_deref(),
            connector_version: self.connector_version.as_deref(),
            risk_tier: self.risk_tier,
            policy_snapshot_hash: &self.policy_snapshot_hash,
            result_hash: &self.result_hash,
            previous_certificate_hash: &self.previous_certificate_hash,
        }
    }
}
