//! The certificate ledger.
//!
//! An ordered, append-only sequence of certificates, each linked to its
//! predecessor by content hash. The ledger is the single writer for its
//! backing file: appends (and the head read that precedes a build) are
//! serialized through one lock, while readers work from an immutable
//! snapshot of the last persisted state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use receipt_common::encoding::{hash_prefix, sha256_hex};
use receipt_common::persist;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink, HASH_PREFIX_LEN};
use crate::canonical::{self, GENESIS};
use crate::certificate::ExecutionCertificate;
use crate::error::LedgerError;
use crate::verify::{self, Verification};

const LEDGER_FILENAME: &str = "certificates.json";
const LEDGER_FORMAT_VERSION: u32 = 1;

/// Immutable view of the ledger contents, oldest first.
pub type LedgerSnapshot = Arc<Vec<ExecutionCertificate>>;

/// On-disk document.
#[derive(Deserialize)]
struct LedgerDocument {
    version: u32,
    certificates: Vec<ExecutionCertificate>,
}

#[derive(Serialize)]
struct LedgerDocumentRef<'a> {
    version: u32,
    certificates: &'a [ExecutionCertificate],
}

/// Outcome of walking the chain from genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub intact: bool,
    pub verified_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
}

/// Per-record verification result.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateVerification {
    pub index: usize,
    pub id: Uuid,
    #[serde(flatten)]
    pub verification: Verification,
}

/// Path of the ledger document under `data_dir`.
pub fn ledger_path(data_dir: &Path) -> PathBuf {
    receipt_common::paths::ledger_dir(data_dir).join(LEDGER_FILENAME)
}

pub struct CertificateLedger {
    path: Option<PathBuf>,
    writer: Mutex<()>,
    snapshot: RwLock<LedgerSnapshot>,
    audit: AuditSink,
}

impl CertificateLedger {
    /// Load the ledger at `path`, or start empty if it does not exist.
    ///
    /// A leftover temp file from an interrupted write is discarded; the
    /// last fully written document is authoritative.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        persist::discard_stale_temp(&path);

        let certificates = match persist::read_json_if_exists::<LedgerDocument>(&path) {
            Ok(Some(doc)) => {
                if doc.version != LEDGER_FORMAT_VERSION {
                    return Err(LedgerError::UnsupportedVersion(doc.version));
                }
                doc.certificates
            }
            Ok(None) => Vec::new(),
            Err(e) => return Err(LedgerError::Corrupt(e.to_string())),
        };

        let ledger = Self {
            path: Some(path),
            writer: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(certificates)),
            audit: AuditSink::disabled(),
        };

        let report = ledger.verify_chain_integrity();
        if report.intact {
            tracing::debug!(count = report.verified_count, "Ledger loaded");
        } else {
            tracing::error!(
                broken_at = ?report.broken_at,
                count = ledger.count(),
                "Ledger loaded with a broken chain"
            );
        }
        Ok(ledger)
    }

    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            writer: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            audit: AuditSink::disabled(),
        }
    }

    /// Report rejected appends on `sink`.
    pub fn with_audit(mut self, sink: AuditSink) -> Self {
        self.audit = sink;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Append a certificate. The only mutation the ledger offers.
    ///
    /// Rejects without touching stored state when the link does not
    /// match the head or the certificate fails hash/signature checks.
    /// The new sequence is persisted before it becomes visible.
    pub fn append(&self, cert: ExecutionCertificate) -> Result<(), LedgerError> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.append_locked(cert)
    }

    /// Build and append under the writer lock.
    ///
    /// `build` receives the current head hash (or `GENESIS`). No other
    /// append can interleave between that read and the append of the
    /// returned certificate.
    pub fn append_with<F, E>(&self, build: F) -> Result<ExecutionCertificate, E>
    where
        F: FnOnce(&str) -> Result<ExecutionCertificate, E>,
        E: From<LedgerError>,
    {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let head = self.head().unwrap_or_else(|| GENESIS.to_string());
        let cert = build(&head)?;
        self.append_locked(cert.clone())?;
        Ok(cert)
    }

    fn append_locked(&self, cert: ExecutionCertificate) -> Result<(), LedgerError> {
        let current = self.all();
        let head = current
            .last()
            .map(|c| c.certificate_hash.as_str())
            .unwrap_or(GENESIS);

        if !verify::verify_link(&cert, head) {
            tracing::warn!(
                expected = hash_prefix(head, HASH_PREFIX_LEN),
                found = hash_prefix(&cert.previous_certificate_hash, HASH_PREFIX_LEN),
                "Append rejected: chain violation"
            );
            self.audit.emit(AuditEvent::ChainViolation {
                expected_prefix: hash_prefix(head, HASH_PREFIX_LEN).to_string(),
                found_prefix: hash_prefix(&cert.previous_certificate_hash, HASH_PREFIX_LEN)
                    .to_string(),
            });
            return Err(LedgerError::ChainViolation {
                expected: head.to_string(),
                found: cert.previous_certificate_hash.clone(),
            });
        }

        let reason = if !verify::verify_hash(&cert) {
            Some("content hash mismatch")
        } else if !verify::verify_signature(&cert) {
            Some("signature invalid")
        } else if current.iter().any(|c| c.id == cert.id) {
            Some("duplicate certificate id")
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::warn!(id = %cert.id, reason, "Append rejected: integrity violation");
            self.audit.emit(AuditEvent::IntegrityViolation {
                id: cert.id,
                reason: reason.to_string(),
            });
            return Err(LedgerError::IntegrityViolation {
                id: cert.id,
                reason: reason.to_string(),
            });
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(cert);

        if let Some(path) = &self.path {
            let doc = LedgerDocumentRef {
                version: LEDGER_FORMAT_VERSION,
                certificates: &next,
            };
            persist::write_json_pretty(path, &doc).map_err(|e| {
                tracing::error!(error = %e, path = %path.display(), "Ledger persist failed");
                LedgerError::Persist(e)
            })?;
        }

        let count = next.len();
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        tracing::debug!(count, "Certificate appended");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn all(&self) -> LedgerSnapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn count(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Hash of the newest certificate.
    pub fn head(&self) -> Option<String> {
        self.all().last().map(|c| c.certificate_hash.clone())
    }

    pub fn by_id(&self, id: &Uuid) -> Option<ExecutionCertificate> {
        self.all().iter().find(|c| &c.id == id).cloned()
    }

    /// Up to `n` certificates, newest first.
    pub fn recent(&self, n: usize) -> Vec<ExecutionCertificate> {
        self.all().iter().rev().take(n).cloned().collect()
    }

    // ── Verification ────────────────────────────────────────────────

    /// Walk from genesis checking each link and recomputed hash.
    ///
    /// Signatures are checked too, so fields outside the content hash
    /// cannot be edited without breaking the chain report.
    pub fn verify_chain_integrity(&self) -> ChainReport {
        let certs = self.all();
        let mut previous = GENESIS;
        for (index, cert) in certs.iter().enumerate() {
            let intact = verify::verify_link(cert, previous)
                && verify::verify_hash(cert)
                && verify::verify_signature(cert);
            if !intact {
                return ChainReport {
                    intact: false,
                    verified_count: index,
                    broken_at: Some(index),
                };
            }
            previous = cert.certificate_hash.as_str();
        }
        ChainReport {
            intact: true,
            verified_count: certs.len(),
            broken_at: None,
        }
    }

    /// Individual hash, signature and link results for every record.
    pub fn verify_all(&self) -> Vec<CertificateVerification> {
        let certs = self.all();
        let mut previous = GENESIS;
        certs
            .iter()
            .enumerate()
            .map(|(index, cert)| {
                let verification = verify::verify_certificate(cert, previous);
                previous = cert.certificate_hash.as_str();
                CertificateVerification {
                    index,
                    id: cert.id,
                    verification,
                }
            })
            .collect()
    }

    /// `["GENESIS", h0, …, hk]` for the certificate at index `k`.
    pub fn hash_chain_proof(&self, id: &Uuid) -> Option<Vec<String>> {
        let certs = self.all();
        let index = certs.iter().position(|c| &c.id == id)?;
        let mut proof = Vec::with_capacity(index + 2);
        proof.push(GENESIS.to_string());
        proof.extend(certs[..=index].iter().map(|c| c.certificate_hash.clone()));
        Some(proof)
    }

    /// Rolling hash over every certificate hash, seeded with `GENESIS`.
    ///
    /// A seam for external notarization; not a security boundary on its own.
    pub fn anchor_root_hash(&self) -> Option<String> {
        let certs = self.all();
        if certs.is_empty() {
            return None;
        }
        let root = certs.iter().fold(GENESIS.to_string(), |acc, cert| {
            sha256_hex(canonical::join(&[&acc, &cert.certificate_hash]).as_bytes())
        });
        Some(root)
    }
}
