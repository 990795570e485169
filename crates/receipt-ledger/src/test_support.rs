use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use receipt_crypto::keystore::SoftwareKeystore;
use receipt_crypto::DeviceKeyManager;

use crate::builder::CertificateBuilder;
use crate::certificate::*;
use crate::ledger::CertificateLedger;
use crate::policy::PolicySnapshot;

/// Unique scratch directory removed on drop.
pub(crate) struct TestDir(PathBuf);

impl TestDir {
    pub(crate) fn new(name: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("receipt-ledger-{name}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub(crate) fn key_manager(dir: &TestDir) -> Arc<DeviceKeyManager> {
    Arc::new(DeviceKeyManager::new(Box::new(SoftwareKeystore::with_secret(
        dir.path().join("keystore"),
        "test-secret",
    ))))
}

pub(crate) fn builder_with(
    dir: &TestDir,
    ledger: CertificateLedger,
) -> (CertificateBuilder, Arc<CertificateLedger>) {
    let ledger = Arc::new(ledger);
    (
        CertificateBuilder::new(key_manager(dir), Arc::clone(&ledger)),
        ledger,
    )
}

pub(crate) fn sample_input() -> CertificateInput {
    CertificateInput {
        intent: Intent {
            action: "send_email".into(),
            target: "alice@example.com".into(),
        },
        proposal: Proposal {
            summary: "Send the quarterly report".into(),
            step_count: 2,
        },
        authorization: AuthorizationToken {
            token_id: "tok-1".into(),
            proposal_id: "prop-1".into(),
            signature: "c2lnbmF0dXJl".into(),
        },
        approver_id: "u1".into(),
        risk_tier: RiskTier::Medium,
        connector_id: Some("mail".into()),
        connector_version: Some("1.2.0".into()),
        result: ExecutionResult {
            status: ResultStatus::Success,
            summary: "sent".into(),
        },
    }
}

/// A genesis certificate plus the directory holding its signing key.
pub(crate) fn sealed_certificate() -> (ExecutionCertificate, TestDir) {
    let dir = TestDir::new("sealed");
    let (builder, _) = builder_with(&dir, CertificateLedger::in_memory());
    let cert = builder
        .build(sample_input(), &PolicySnapshot::new("v1"))
        .unwrap();
    (cert, dir)
}
