//! Stateless certificate verification.
//!
//! Hash and signature checks are independent: the content hash catches
//! field edits, the signature catches a forger who recomputed the hash.
//! A certificate is trusted only when both hold and its link matches.

use receipt_common::encoding::is_sha256_hex;
use receipt_crypto::{hardware, signing};
use serde::Serialize;

use crate::canonical::{self, GENESIS};
use crate::certificate::ExecutionCertificate;

/// Recompute the content hash from the stored fields.
pub fn verify_hash(cert: &ExecutionCertificate) -> bool {
    cert.signed_fields().content_hash() == cert.certificate_hash
}

/// Rebuild the signed payload and check it against the embedded key.
///
/// Also requires `device_key_id` to be the fingerprint of that key, the
/// payload to split back into exactly the stored fields, and any
/// enclave-backed claim to be attested by this device.
pub fn verify_signature(cert: &ExecutionCertificate) -> bool {
    if signing::fingerprint(&cert.signer_public_key) != cert.device_key_id {
        return false;
    }
    if !payload_is_unambiguous(cert) {
        return false;
    }
    if cert.enclave_backed && !hardware::attests(&cert.signer_public_key) {
        return false;
    }
    let payload = cert.signed_fields().payload();
    signing::verify_signature(&cert.signer_public_key, payload.as_bytes(), &cert.signature)
}

/// Digests must be hex and plaintext must be free of separators and the
/// absent marker, or a different field split could yield the same bytes.
fn payload_is_unambiguous(cert: &ExecutionCertificate) -> bool {
    let digests = [
        &cert.intent_hash,
        &cert.proposal_hash,
        &cert.authorization_token_hash,
        &cert.approver_id_hash,
        &cert.policy_snapshot_hash,
        &cert.result_hash,
    ];
    let previous_ok =
        cert.previous_certificate_hash == GENESIS || is_sha256_hex(&cert.previous_certificate_hash);
    let plaintext_ok = [&cert.connector_id, &cert.connector_version]
        .into_iter()
        .flatten()
        .all(|value| canonical::check_plaintext(value).is_ok());

    digests.into_iter().all(|d| is_sha256_hex(d)) && previous_ok && plaintext_ok
}

pub fn verify_link(cert: &ExecutionCertificate, expected_previous: &str) -> bool {
    cert.previous_certificate_hash == expected_previous
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub hash_valid: bool,
    pub signature_valid: bool,
    pub link_valid: bool,
}

impl Verification {
    pub fn trusted(&self) -> bool {
        self.hash_valid && self.signature_valid && self.link_valid
    }
}

pub fn verify_certificate(cert: &ExecutionCertificate, expected_previous: &str) -> Verification {
    Verification {
        hash_valid: verify_hash(cert),
        signature_valid: verify_signature(cert),
        link_valid: verify_link(cert, expected_previous),
    }
}
