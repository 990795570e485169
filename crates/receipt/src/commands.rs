//! CLI subcommand handlers, the application service layer.
//!
//! Each function orchestrates a single verb against the [`Runtime`]
//! built by `main.rs` and produces output (human or JSON). Formatting
//! lives in `format.rs`.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use uuid::Uuid;

use receipt_common::persist;
use receipt_crypto::{DeviceKeyManager, KeyError};
use receipt_ledger::audit::spawn_log_writer;
use receipt_ledger::{
    AuditSink, AuthorizationToken, CertificateBuilder, CertificateInput, CertificateLedger,
    ExecutionResult, Intent, PolicySnapshot, Proposal,
};

use crate::cli::IssueArgs;
use crate::config::Config;
use crate::format;

/// Composition root: one key manager, one ledger, one builder, one
/// audit writer, shared for the lifetime of the process.
pub struct Runtime {
    pub config: Config,
    pub keys: Arc<DeviceKeyManager>,
    pub ledger: Arc<CertificateLedger>,
    pub builder: CertificateBuilder,
    audit_writer: tokio::task::JoinHandle<()>,
}

impl Runtime {
    /// Must be called inside a Tokio runtime (the audit writer is a task).
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let (sink, rx) = AuditSink::channel(config.audit_channel_capacity);
        let audit_writer = spawn_log_writer(rx, config.audit_log_path.clone());

        let keys = Arc::new(DeviceKeyManager::select(
            &config.keystore_dir,
            config.prefer_hardware,
        ));
        let ledger = Arc::new(
            CertificateLedger::open(&config.ledger_path)
                .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?
                .with_audit(sink.clone()),
        );
        let builder = CertificateBuilder::new(Arc::clone(&keys), Arc::clone(&ledger))
            .with_audit(sink)
            .with_latency_budget(config.latency_budget);

        Ok(Self {
            config,
            keys,
            ledger,
            builder,
            audit_writer,
        })
    }

    /// Drop every audit sender, then wait for the writer to drain.
    pub async fn shutdown(self) {
        let Self {
            builder,
            ledger,
            audit_writer,
            ..
        } = self;
        drop(builder);
        drop(ledger);
        if let Err(e) = audit_writer.await {
            tracing::warn!(error = %e, "Audit writer did not shut down cleanly");
        }
    }
}

fn parse_id(id: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("invalid certificate ID \"{id}\""))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Init ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct KeyInfo {
    backend: &'static str,
    fingerprint: String,
    hardware_backed: bool,
}

pub fn init(rt: &Runtime, json: bool) -> anyhow::Result<()> {
    rt.keys.ensure_key().context("device key unavailable")?;
    let info = KeyInfo {
        backend: rt.keys.backend_name(),
        fingerprint: rt.keys.fingerprint()?,
        hardware_backed: rt.keys.hardware_backed()?,
    };
    if json {
        return print_json(&info);
    }
    println!("Data directory: {}", rt.config.data_dir.display());
    println!("Key backend:    {}", info.backend);
    println!("Fingerprint:    {}", info.fingerprint);
    println!(
        "Hardware:       {}",
        if info.hardware_backed { "yes" } else { "no" }
    );
    Ok(())
}

// ── Issue ───────────────────────────────────────────────────────────

pub fn issue(rt: &Runtime, args: IssueArgs, json: bool) -> anyhow::Result<()> {
    let policy = args
        .flags
        .iter()
        .fold(PolicySnapshot::new(args.policy_version.clone()), |p, (name, on)| {
            p.with_flag(name.clone(), *on)
        });
    let input = CertificateInput {
        intent: Intent {
            action: args.action,
            target: args.target,
        },
        proposal: Proposal {
            summary: args.proposal,
            step_count: args.steps,
        },
        authorization: AuthorizationToken {
            token_id: args.token_id,
            proposal_id: args.token_proposal,
            signature: args.token_signature,
        },
        approver_id: args.approver,
        risk_tier: args.risk,
        connector_id: args.connector,
        connector_version: args.connector_version,
        result: ExecutionResult {
            status: args.status,
            summary: args.result,
        },
    };

    let cert = rt
        .builder
        .build(input, &policy)
        .context("action was not certified")?;

    if json {
        print_json(&cert)
    } else {
        println!("Issued {}", cert.id());
        println!("  Certificate: {}", cert.certificate_hash());
        println!("  Previous:    {}", cert.previous_certificate_hash());
        Ok(())
    }
}

// ── Read ────────────────────────────────────────────────────────────

pub fn list(rt: &Runtime, limit: usize, json: bool) -> anyhow::Result<()> {
    let recent = rt.ledger.recent(limit);
    if json {
        return print_json(&recent);
    }
    if recent.is_empty() {
        println!("No certificates.");
    }
    for cert in &recent {
        format::certificate_line(cert);
    }
    Ok(())
}

pub fn show(rt: &Runtime, id: &str, json: bool) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let cert = rt
        .ledger
        .by_id(&id)
        .with_context(|| format!("no certificate with ID {id}"))?;
    if json {
        print_json(&cert)
    } else {
        format::certificate_detail(&cert);
        Ok(())
    }
}

pub fn proof(rt: &Runtime, id: &str, json: bool) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let proof = rt
        .ledger
        .hash_chain_proof(&id)
        .with_context(|| format!("no certificate with ID {id}"))?;
    if json {
        print_json(&proof)
    } else {
        format::proof(&proof);
        Ok(())
    }
}

// ── Verify ──────────────────────────────────────────────────────────

pub fn verify(rt: &Runtime, signatures: bool, json: bool) -> anyhow::Result<()> {
    let report = rt.ledger.verify_chain_integrity();
    let details = signatures.then(|| rt.ledger.verify_all());

    if json {
        #[derive(Serialize)]
        struct VerifyOutput<'a> {
            #[serde(flatten)]
            report: &'a receipt_ledger::ChainReport,
            #[serde(skip_serializing_if = "Option::is_none")]
            certificates: Option<&'a Vec<receipt_ledger::ledger::CertificateVerification>>,
        }
        print_json(&VerifyOutput {
            report: &report,
            certificates: details.as_ref(),
        })?;
    } else {
        if let Some(details) = &details {
            for entry in details {
                format::verification_line(entry);
            }
        }
        format::chain_report(&report, rt.ledger.count());
    }

    if !report.intact {
        anyhow::bail!("ledger chain verification failed");
    }
    Ok(())
}

// ── Export ──────────────────────────────────────────────────────────

pub fn export(
    rt: &Runtime,
    id: &str,
    out: Option<&std::path::Path>,
    json: bool,
) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let bundle = rt
        .ledger
        .export(&id, &rt.keys)
        .with_context(|| format!("no certificate with ID {id}"))?;

    match out {
        Some(path) => {
            persist::write_json_pretty(path, &bundle)
                .with_context(|| format!("writing {}", path.display()))?;
            if json {
                print_json(&serde_json::json!({ "written": path }))?;
            } else {
                format::export_summary(&bundle);
                println!("Written to {}", path.display());
            }
        }
        None => print_json(&bundle)?,
    }
    Ok(())
}

// ── Status ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusOutput {
    version: &'static str,
    data_dir: String,
    ledger_path: String,
    count: usize,
    head: Option<String>,
    anchor_root_hash: Option<String>,
    chain_intact: bool,
    key_backend: &'static str,
    key_fingerprint: Option<String>,
}

pub fn status(rt: &Runtime, json: bool) -> anyhow::Result<()> {
    let key_fingerprint = match rt.keys.fingerprint() {
        Ok(fp) => Some(fp),
        Err(KeyError::KeyNotFound) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read device key");
            None
        }
    };
    let status = StatusOutput {
        version: env!("CARGO_PKG_VERSION"),
        data_dir: rt.config.data_dir.display().to_string(),
        ledger_path: rt.config.ledger_path.display().to_string(),
        count: rt.ledger.count(),
        head: rt.ledger.head(),
        anchor_root_hash: rt.ledger.anchor_root_hash(),
        chain_intact: rt.ledger.verify_chain_integrity().intact,
        key_backend: rt.keys.backend_name(),
        key_fingerprint,
    };

    if json {
        return print_json(&status);
    }
    println!("receipt {}", status.version);
    println!("  Data directory: {}", status.data_dir);
    println!("  Ledger:         {}", status.ledger_path);
    println!("  Certificates:   {}", status.count);
    println!("  Head:           {}", status.head.as_deref().unwrap_or("GENESIS"));
    if let Some(anchor) = &status.anchor_root_hash {
        println!("  Anchor:         {anchor}");
    }
    println!(
        "  Chain:          {}",
        if status.chain_intact { "intact" } else { "BROKEN" }
    );
    println!("  Key backend:    {}", status.key_backend);
    println!(
        "  Device key:     {}",
        status.key_fingerprint.as_deref().unwrap_or("not created (run `receipt init`)")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("receipt-cmd-{name}-{nanos}"))
    }

    fn issue_args() -> IssueArgs {
        IssueArgs {
            action: "send_email".into(),
            target: "bob@example.com".into(),
            proposal: "notify bob".into(),
            steps: 1,
            token_id: "tok-1".into(),
            token_proposal: "prop-1".into(),
            token_signature: "sig".into(),
            approver: "u1".into(),
            risk: receipt_ledger::RiskTier::Low,
            connector: None,
            connector_version: None,
            status: receipt_ledger::ResultStatus::Success,
            result: "sent".into(),
            policy_version: "v1".into(),
            flags: vec![("mfa".into(), true)],
        }
    }

    #[tokio::test]
    async fn issue_then_verify_writes_audit_log() {
        let dir = temp_dir("issue");
        crate::config::ensure_data_dir(&dir).unwrap();
        let mut config = Config::load(&dir).unwrap();
        config.prefer_hardware = false;
        let audit_path = config.audit_log_path.clone();

        let rt = Runtime::open(config).unwrap();
        issue(&rt, issue_args(), true).unwrap();
        issue(&rt, issue_args(), true).unwrap();
        assert_eq!(rt.ledger.count(), 2);
        verify(&rt, true, true).unwrap();

        let id = rt.ledger.recent(1)[0].id().to_string();
        export(&rt, &id, Some(&dir.join("bundle.json")), true).unwrap();
        assert!(dir.join("bundle.json").exists());
        assert!(show(&rt, "not-a-uuid", true).is_err());
        rt.shutdown().await;

        let log = std::fs::read_to_string(audit_path).unwrap();
        assert_eq!(log.matches("certificate_issued").count(), 2);
        assert!(!log.contains("bob@example.com"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
