//! Audit export bundles.
//!
//! A bundle carries one certificate, the fingerprint of its signer, the
//! inclusion proof back to genesis and, best-effort, a device signature
//! over the bundle itself. The certificate is independently verifiable,
//! so a failed export signature yields an unsigned bundle rather than an
//! error.

use chrono::{DateTime, SubsecRound, Utc};
use receipt_common::encoding::{base64_bytes_opt, hash_prefix};
use receipt_crypto::{signing, DeviceKeyManager};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::HASH_PREFIX_LEN;
use crate::canonical::{self, GENESIS};
use crate::certificate::ExecutionCertificate;
use crate::ledger::CertificateLedger;
use crate::verify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExportBundle {
    pub certificate: ExecutionCertificate,
    pub signer_public_key_hash: String,
    pub hash_chain_proof: Vec<String>,
    pub exported_at: DateTime<Utc>,
    #[serde(with = "base64_bytes_opt", default)]
    pub export_signature: Option<Vec<u8>>,
}

/// What an auditor can establish from a bundle alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportVerification {
    pub certificate_hash_valid: bool,
    pub certificate_signature_valid: bool,
    pub signer_matches: bool,
    pub proof_consistent: bool,
    /// `None` when the bundle was exported unsigned.
    pub export_signature_valid: Option<bool>,
}

impl ExportVerification {
    pub fn trusted(&self) -> bool {
        self.certificate_hash_valid
            && self.certificate_signature_valid
            && self.signer_matches
            && self.proof_consistent
            && self.export_signature_valid == Some(true)
    }
}

impl AuditExportBundle {
    /// `certificate_hash|signer_public_key_hash|h0,h1,…|exported_at`
    pub fn signing_payload(&self) -> String {
        canonical::join(&[
            &self.certificate.certificate_hash,
            &self.signer_public_key_hash,
            &self.hash_chain_proof.join(","),
            &canonical::canonical_timestamp(&self.exported_at),
        ])
    }

    pub fn verify(&self) -> ExportVerification {
        let cert = &self.certificate;
        let proof_consistent = self.hash_chain_proof.first().map(String::as_str) == Some(GENESIS)
            && self.hash_chain_proof.last() == Some(&cert.certificate_hash)
            && self
                .hash_chain_proof
                .get(self.hash_chain_proof.len().wrapping_sub(2))
                .map(String::as_str)
                == Some(cert.previous_certificate_hash.as_str());

        let export_signature_valid = self.export_signature.as_ref().map(|sig| {
            signing::verify_signature(
                &cert.signer_public_key,
                self.signing_payload().as_bytes(),
                sig,
            )
        });

        ExportVerification {
            certificate_hash_valid: verify::verify_hash(cert),
            certificate_signature_valid: verify::verify_signature(cert),
            signer_matches: signing::fingerprint(&cert.signer_public_key)
                == self.signer_public_key_hash,
            proof_consistent,
            export_signature_valid,
        }
    }
}

impl CertificateLedger {
    /// Package the certificate `id` for an external auditor.
    pub fn export(&self, id: &Uuid, keys: &DeviceKeyManager) -> Option<AuditExportBundle> {
        let certificate = self.by_id(id)?;
        let hash_chain_proof = self.hash_chain_proof(id)?;

        let mut bundle = AuditExportBundle {
            signer_public_key_hash: signing::fingerprint(&certificate.signer_public_key),
            certificate,
            hash_chain_proof,
            exported_at: Utc::now().trunc_subsecs(3),
            export_signature: None,
        };

        // The bundle names a single signer, so only that key may sign it.
        let signed = keys.fingerprint().and_then(|fp| {
            if fp == bundle.certificate.device_key_id {
                keys.sign(bundle.signing_payload().as_bytes()).map(Some)
            } else {
                tracing::warn!(
                    id = %id,
                    device_key = hash_prefix(&fp, HASH_PREFIX_LEN),
                    "Certificate was signed by another device key; returning unsigned bundle"
                );
                Ok(None)
            }
        });
        match signed {
            Ok(signature) => bundle.export_signature = signature,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Export signing failed; returning unsigned bundle");
            }
        }
        Some(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{builder_with, sample_input, TestDir};
    use crate::PolicySnapshot;

    #[test]
    fn exported_bundle_verifies() {
        let dir = TestDir::new("export-ok");
        let (builder, ledger) = builder_with(&dir, CertificateLedger::in_memory());
        builder.build(sample_input(), &PolicySnapshot::new("v1")).unwrap();
        let cert = builder.build(sample_input(), &PolicySnapshot::new("v1")).unwrap();

        let bundle = ledger.export(&cert.id(), builder.keys()).unwrap();
        assert_eq!(bundle.hash_chain_proof.len(), 3);
        assert!(bundle.export_signature.is_some());
        let v = bundle.verify();
        assert!(v.trusted(), "{v:?}");
    }

    #[test]
    fn bundle_survives_json_transport() {
        let dir = TestDir::new("export-json");
        let (builder, ledger) = builder_with(&dir, CertificateLedger::in_memory());
        let cert = builder.build(sample_input(), &PolicySnapshot::new("v1")).unwrap();
        let bundle = ledger.export(&cert.id(), builder.keys()).unwrap();

        let json = serde_json::to_string(&bundle).unwrap();
        let back: AuditExportBundle = serde_json::from_str(&json).unwrap();
        assert!(back.verify().trusted());
    }

    #[test]
    fn tampered_bundle_fails_export_signature() {
        let dir = TestDir::new("export-tamper");
        let (builder, ledger) = builder_with(&dir, CertificateLedger::in_memory());
        let cert = builder.build(sample_input(), &PolicySnapshot::new("v1")).unwrap();
        let mut bundle = ledger.export(&cert.id(), builder.keys()).unwrap();

        bundle.exported_at += chrono::Duration::seconds(1);
        let v = bundle.verify();
        assert_eq!(v.export_signature_valid, Some(false));
        assert!(v.certificate_signature_valid);
        assert!(!v.trusted());
    }

    #[test]
    fn unsigned_bundle_when_export_signing_fails() {
        let dir = TestDir::new("export-unsigned");
        let (builder, ledger) = builder_with(&dir, CertificateLedger::in_memory());
        let cert = builder.build(sample_input(), &PolicySnapshot::new("v1")).unwrap();

        // A manager over an empty keystore cannot sign.
        let empty = TestDir::new("export-unsigned-keys");
        let no_keys = DeviceKeyManager::new(Box::new(
            receipt_crypto::keystore::SoftwareKeystore::with_secret(empty.path(), "s"),
        ));

        let bundle = ledger.export(&cert.id(), &no_keys).unwrap();
        assert!(bundle.export_signature.is_none());
        let v = bundle.verify();
        assert_eq!(v.export_signature_valid, None);
        assert!(v.certificate_hash_valid && v.certificate_signature_valid && v.proof_consistent);
    }

    #[test]
    fn foreign_device_key_does_not_sign_export() {
        let dir = TestDir::new("export-foreign");
        let (builder, ledger) = builder_with(&dir, CertificateLedger::in_memory());
        let cert = builder.build(sample_input(), &PolicySnapshot::new("v1")).unwrap();

        // The ledger outlived its key: a new device key is present.
        let other = TestDir::new("export-foreign-keys");
        let replacement = crate::test_support::key_manager(&other);
        replacement.ensure_key().unwrap();
        assert_ne!(replacement.fingerprint().unwrap(), cert.device_key_id());

        let bundle = ledger.export(&cert.id(), &replacement).unwrap();
        assert!(bundle.export_signature.is_none());
        assert_eq!(bundle.signer_public_key_hash, cert.device_key_id());
        let v = bundle.verify();
        assert_eq!(v.export_signature_valid, None);
        assert!(v.certificate_signature_valid && v.signer_matches);
    }

    #[test]
    fn unknown_id_exports_nothing() {
        let dir = TestDir::new("export-missing");
        let (builder, ledger) = builder_with(&dir, CertificateLedger::in_memory());
        assert!(ledger.export(&Uuid::new_v4(), builder.keys()).is_none());
    }
}
