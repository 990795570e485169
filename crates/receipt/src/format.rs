//! Human-readable CLI output formatting.
//!
//! JSON output bypasses this module entirely; handlers serialize the
//! domain types directly.

use receipt_common::encoding::{hash_prefix, hex_encode};
use receipt_ledger::ledger::CertificateVerification;
use receipt_ledger::{AuditExportBundle, ChainReport, ExecutionCertificate};

const SHORT_HASH: usize = 12;

/// Print a single-line summary of a certificate.
///
/// Format: `ID\tTIMESTAMP\tRISK\tCONNECTOR\tCERT`
pub fn certificate_line(cert: &ExecutionCertificate) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        cert.id(),
        cert.timestamp().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        cert.risk_tier(),
        cert.connector_id().unwrap_or("-"),
        hash_prefix(cert.certificate_hash(), SHORT_HASH),
    );
}

/// Print every field of a certificate.
pub fn certificate_detail(cert: &ExecutionCertificate) {
    println!("{}", cert.id());
    println!("  Timestamp:     {}", cert.timestamp().to_rfc3339());
    println!("  Risk tier:     {}", cert.risk_tier());
    match (cert.connector_id(), cert.connector_version()) {
        (Some(id), Some(version)) => println!("  Connector:     {id} {version}"),
        (Some(id), None) => println!("  Connector:     {id}"),
        _ => {}
    }
    println!("  Intent:        {}", cert.intent_hash());
    println!("  Proposal:      {}", cert.proposal_hash());
    println!("  Authorization: {}", cert.authorization_token_hash());
    println!("  Approver:      {}", cert.approver_id_hash());
    println!("  Result:        {}", cert.result_hash());
    println!("  Policy:        {}", cert.policy_snapshot_hash());
    println!("  Device key:    {}", cert.device_key_id());
    println!(
        "  Enclave:       {}",
        if cert.enclave_backed() { "yes" } else { "no" }
    );
    println!("  Previous:      {}", cert.previous_certificate_hash());
    println!("  Certificate:   {}", cert.certificate_hash());
    println!("  Signature:     {}", hex_encode(cert.signature()));
}

pub fn chain_report(report: &ChainReport, total: usize) {
    if report.intact {
        println!("Chain intact: {}/{} certificates verified", report.verified_count, total);
    } else {
        let at = report
            .broken_at
            .map(|i| i.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "Chain BROKEN at index {at}: {}/{} certificates verified before the break",
            report.verified_count, total
        );
    }
}

/// Format: `INDEX\tID\tHASH\tSIGNATURE\tLINK`
pub fn verification_line(entry: &CertificateVerification) {
    let mark = |ok: bool| if ok { "ok" } else { "FAIL" };
    println!(
        "{}\t{}\thash={}\tsignature={}\tlink={}",
        entry.index,
        entry.id,
        mark(entry.verification.hash_valid),
        mark(entry.verification.signature_valid),
        mark(entry.verification.link_valid),
    );
}

pub fn proof(proof: &[String]) {
    for (i, hash) in proof.iter().enumerate() {
        if i == 0 {
            println!("{hash}");
        } else {
            println!("  -> {hash}");
        }
    }
}

pub fn export_summary(bundle: &AuditExportBundle) {
    println!("Certificate:  {}", bundle.certificate.id());
    println!("Signer:       {}", bundle.signer_public_key_hash);
    println!("Proof length: {}", bundle.hash_chain_proof.len());
    println!("Exported at:  {}", bundle.exported_at.to_rfc3339());
    println!(
        "Signed:       {}",
        if bundle.export_signature.is_some() { "yes" } else { "no" }
    );
}
