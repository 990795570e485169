//! Certificate builder.
//!
//! Turns the plaintext description of an already-approved action into a
//! sealed certificate and appends it to the ledger in one fail-closed
//! sequence. The builder never decides whether an action is allowed;
//! it only refuses to seal while an upstream lockdown is in force.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{SubsecRound, Utc};
use receipt_common::encoding::hash_prefix;
use receipt_crypto::{signing, DeviceKeyManager};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink, HASH_PREFIX_LEN};
use crate::canonical::{self, SignedFields};
use crate::certificate::{CertificateInput, ExecutionCertificate, HashedInput};
use crate::error::BuildError;
use crate::ledger::CertificateLedger;
use crate::policy::PolicySnapshot;

/// Soft latency budget for one build.
pub const DEFAULT_LATENCY_BUDGET: Duration = Duration::from_millis(50);

pub struct CertificateBuilder {
    keys: Arc<DeviceKeyManager>,
    ledger: Arc<CertificateLedger>,
    audit: AuditSink,
    latency_budget: Duration,
    lockdown: RwLock<Option<String>>,
}

impl CertificateBuilder {
    pub fn new(keys: Arc<DeviceKeyManager>, ledger: Arc<CertificateLedger>) -> Self {
        Self {
            keys,
            ledger,
            audit: AuditSink::disabled(),
            latency_budget: DEFAULT_LATENCY_BUDGET,
            lockdown: RwLock::new(None),
        }
    }

    pub fn with_audit(mut self, sink: AuditSink) -> Self {
        self.audit = sink;
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }

    pub fn ledger(&self) -> &Arc<CertificateLedger> {
        &self.ledger
    }

    pub fn keys(&self) -> &Arc<DeviceKeyManager> {
        &self.keys
    }

    // ── Lockdown posture ────────────────────────────────────────────

    /// Stop issuing certificates, e.g. on an upstream tamper signal.
    pub fn lockdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Certificate issuance locked down");
        *self.lockdown.write().unwrap_or_else(|e| e.into_inner()) = Some(reason.clone());
        self.audit.emit(AuditEvent::LockdownEngaged { reason });
    }

    pub fn lift_lockdown(&self) {
        let previous = self
            .lockdown
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            tracing::info!("Certificate issuance lockdown lifted");
            self.audit.emit(AuditEvent::LockdownLifted);
        }
    }

    pub fn lockdown_reason(&self) -> Option<String> {
        self.lockdown
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Build ───────────────────────────────────────────────────────

    /// Seal `input` under `policy` and append it to the ledger.
    ///
    /// Any error means the action is not certified and must be aborted
    /// or rolled back by the caller. Nothing is persisted on failure.
    pub fn build(
        &self,
        input: CertificateInput,
        policy: &PolicySnapshot,
    ) -> Result<ExecutionCertificate, BuildError> {
        let started = Instant::now();

        if let Some(reason) = self.lockdown_reason() {
            tracing::warn!(reason = %reason, "Build refused during lockdown");
            return Err(BuildError::Lockdown(reason));
        }
        check_connector(&input)?;

        let signer_public_key = self.keys.ensure_key()?;
        let device_key_id = signing::fingerprint(&signer_public_key);
        let enclave_backed = self.keys.hardware_backed()?;

        // The plaintext input is consumed here.
        let hashed = HashedInput::from(input);
        let policy_snapshot_hash = policy.hash();

        let id = Uuid::new_v4();
        let timestamp = Utc::now().trunc_subsecs(3);

        let cert = self.ledger.append_with(|head| {
            let fields = SignedFields {
                id,
                timestamp,
                intent_hash: &hashed.intent_hash,
                proposal_hash: &hashed.proposal_hash,
                authorization_token_hash: &hashed.authorization_token_hash,
                approver_id_hash: &hashed.approver_id_hash,
                device_key_id: &device_key_id,
                connector_id: hashed.connector_id.as_deref(),
                connector_version: hashed.connector_version.as_deref(),
                risk_tier: hashed.risk_tier,
                policy_snapshot_hash: &policy_snapshot_hash,
                result_hash: &hashed.result_hash,
                previous_certificate_hash: head,
            };
            let payload = fields.payload();
            let signature = self.keys.sign(payload.as_bytes())?;
            let certificate_hash = fields.content_hash();

            Ok::<_, BuildError>(ExecutionCertificate {
                id,
                timestamp,
                intent_hash: hashed.intent_hash.clone(),
                proposal_hash: hashed.proposal_hash.clone(),
                authorization_token_hash: hashed.authorization_token_hash.clone(),
                approver_id_hash: hashed.approver_id_hash.clone(),
                result_hash: hashed.result_hash.clone(),
                device_key_id: device_key_id.clone(),
                connector_id: hashed.connector_id.clone(),
                connector_version: hashed.connector_version.clone(),
                risk_tier: hashed.risk_tier,
                policy_snapshot_hash: policy_snapshot_hash.clone(),
                signature,
                signer_public_key: signer_public_key.clone(),
                enclave_backed,
                certificate_hash,
                previous_certificate_hash: head.to_string(),
            })
        })?;

        let elapsed = started.elapsed();
        let over_budget = elapsed > self.latency_budget;
        if over_budget {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.latency_budget.as_millis() as u64,
                "Certificate build exceeded latency budget"
            );
        }
        tracing::info!(
            id = %cert.id,
            cert = hash_prefix(&cert.certificate_hash, HASH_PREFIX_LEN),
            risk = %cert.risk_tier,
            "Certificate issued"
        );

        self.audit.emit(AuditEvent::CertificateIssued {
            id: cert.id,
            certificate_hash_prefix: hash_prefix(&cert.certificate_hash, HASH_PREFIX_LEN)
                .to_string(),
            intent_hash_prefix: hash_prefix(&cert.intent_hash, HASH_PREFIX_LEN).to_string(),
            risk_tier: cert.risk_tier,
            connector_id: cert.connector_id.clone(),
            enclave_backed: cert.enclave_backed,
            elapsed_ms: elapsed.as_millis() as u64,
            over_budget,
        });

        Ok(cert)
    }
}

/// The connector fields enter the signed payload verbatim.
fn check_connector(input: &CertificateInput) -> Result<(), BuildError> {
    let fields = [
        ("connector_id", input.connector_id.as_deref()),
        ("connector_version", input.connector_version.as_deref()),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            canonical::check_plaintext(value).map_err(|reason| {
                tracing::warn!(field, reason, "Build refused: ambiguous connector field");
                BuildError::InvalidField { field, reason }
            })?;
        }
    }
    Ok(())
}
