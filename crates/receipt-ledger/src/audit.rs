//! Audit events and the append-only audit log.
//!
//! The builder and ledger push [`AuditEvent`]s into a bounded channel
//! without waiting. A background task drains the channel into a
//! human-readable log. Only hash prefixes and metadata are ever
//! recorded, and a full or closed channel never affects issuance.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::certificate::RiskTier;

const AUDIT_FILENAME: &str = "receipt-audit.log";

/// Characters of a digest kept in audit records.
pub const HASH_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    CertificateIssued {
        id: Uuid,
        certificate_hash_prefix: String,
        intent_hash_prefix: String,
        risk_tier: RiskTier,
        connector_id: Option<String>,
        enclave_backed: bool,
        elapsed_ms: u64,
        over_budget: bool,
    },
    ChainViolation {
        expected_prefix: String,
        found_prefix: String,
    },
    IntegrityViolation {
        id: Uuid,
        reason: String,
    },
    LockdownEngaged {
        reason: String,
    },
    LockdownLifted,
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CertificateIssued { .. } => "certificate_issued",
            Self::ChainViolation { .. } => "chain_violation",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::LockdownEngaged { .. } => "lockdown_engaged",
            Self::LockdownLifted => "lockdown_lifted",
        }
    }

    /// Key/value pairs for the log line.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::CertificateIssued {
                id,
                certificate_hash_prefix,
                intent_hash_prefix,
                risk_tier,
                connector_id,
                enclave_backed,
                elapsed_ms,
                over_budget,
            } => {
                let mut fields = vec![
                    ("id", id.to_string()),
                    ("cert", certificate_hash_prefix.clone()),
                    ("intent", intent_hash_prefix.clone()),
                    ("risk", risk_tier.to_string()),
                ];
                if let Some(connector) = connector_id {
                    fields.push(("connector", connector.clone()));
                }
                fields.push(("enclave", enclave_backed.to_string()));
                fields.push(("elapsed_ms", elapsed_ms.to_string()));
                if *over_budget {
                    fields.push(("over_budget", "true".to_string()));
                }
                fields
            }
            Self::ChainViolation {
                expected_prefix,
                found_prefix,
            } => vec![
                ("expected", expected_prefix.clone()),
                ("found", found_prefix.clone()),
            ],
            Self::IntegrityViolation { id, reason } => {
                vec![("id", id.to_string()), ("reason", reason.clone())]
            }
            Self::LockdownEngaged { reason } => vec![("reason", reason.clone())],
            Self::LockdownLifted => Vec::new(),
        }
    }
}

/// Fire-and-forget handle onto the audit channel.
#[derive(Debug, Clone, Default)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditSink {
    /// A sink plus the receiver a log writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::debug!(error = %e, "Audit event dropped");
        }
    }
}

/// Path to the audit log under `data_dir`.
pub fn audit_log_path(data_dir: &Path) -> PathBuf {
    receipt_common::paths::log_dir(data_dir).join(AUDIT_FILENAME)
}

/// Append an audit entry with the given event name and key=value fields.
///
/// Format: `2026-02-11T10:30:00Z | certificate_issued | id=… | cert=3f9a…`
pub fn append_entry_to(
    path: &Path,
    event: &str,
    fields: &[(&str, String)],
) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let mut line = format!("{timestamp} | {event}");

    for (key, value) in fields {
        line.push_str(&format!(" | {key}={value}"));
    }
    line.push('\n');

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;

    tracing::debug!(event, "Audit log entry written");
    Ok(())
}

/// Drain `rx` into the log at `path` until every sender is dropped.
pub fn spawn_log_writer(
    mut rx: mpsc::Receiver<AuditEvent>,
    path: PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = append_entry_to(&path, event.name(), &event.fields()) {
                tracing::warn!(error = %e, event = event.name(), "Failed to write audit entry");
            }
        }
        tracing::debug!("Audit channel closed");
    })
}

/// Read the audit log, empty if it does not exist yet.
pub fn read_log(path: &Path) -> Result<String, std::io::Error> {
    if path.exists() {
        std::fs::read_to_string(path)
    } else {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDir;

    #[test]
    fn append_and_read_entries() {
        let dir = TestDir::new("audit-append");
        let path = dir.path().join("audit.log");

        append_entry_to(&path, "lockdown_engaged", &[("reason", "jailbreak".into())]).unwrap();
        append_entry_to(&path, "lockdown_lifted", &[]).unwrap();

        let content = read_log(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("| lockdown_engaged | reason=jailbreak"));
        assert!(lines[1].ends_with("| lockdown_lifted"));
    }

    #[test]
    fn disabled_and_full_sinks_never_block() {
        AuditSink::disabled().emit(AuditEvent::LockdownLifted);

        let (sink, mut rx) = AuditSink::channel(1);
        sink.emit(AuditEvent::LockdownLifted);
        sink.emit(AuditEvent::LockdownLifted);
        assert_eq!(rx.try_recv().unwrap(), AuditEvent::LockdownLifted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn issued_event_fields_carry_prefixes_only() {
        let event = AuditEvent::CertificateIssued {
            id: Uuid::nil(),
            certificate_hash_prefix: "abcdef012345".into(),
            intent_hash_prefix: "0123456789ab".into(),
            risk_tier: RiskTier::High,
            connector_id: None,
            enclave_backed: false,
            elapsed_ms: 3,
            over_budget: false,
        };
        let fields = event.fields();
        assert!(fields.contains(&("cert", "abcdef012345".to_string())));
        assert!(!fields.iter().any(|(k, _)| *k == "connector" || *k == "over_budget"));
    }

    #[tokio::test]
    async fn log_writer_drains_channel() {
        let dir = TestDir::new("audit-writer");
        let path = dir.path().join("audit.log");
        let (sink, rx) = AuditSink::channel(8);
        let writer = spawn_log_writer(rx, path.clone());

        sink.emit(AuditEvent::LockdownEngaged {
            reason: "tamper".into(),
        });
        drop(sink);
        writer.await.unwrap();

        assert!(read_log(&path).unwrap().contains("lockdown_engaged | reason=tamper"));
    }
}
