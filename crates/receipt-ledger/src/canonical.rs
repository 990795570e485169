//! Canonical forms and field hashing.
//!
//! Every digest is lowercase hex SHA-256 over the UTF-8 bytes of a
//! `|`-separated field join. The layouts below are a wire contract:
//! previously issued signatures and chain links only verify if these
//! joins are reproduced byte for byte.
//!
//! | Digest | Joined fields |
//! |---|---|
//! | intent | `action`, `target` |
//! | proposal | `summary`, `step_count` |
//! | authorization token | `token_id`, `proposal_id`, `signature` |
//! | approver | `approver_id` |
//! | result | `status`, `summary` |
//! | certificate (content) | intent, proposal, token, result hashes, timestamp, previous hash |
//!
//! The signed payload joins, in order: id, timestamp, intent, proposal,
//! token and approver hashes, device key id, connector id, connector
//! version (`none` when absent), risk tier, policy snapshot hash, result
//! hash, previous certificate hash.
//!
//! The connector fields are the only plaintext in that join. They may not
//! contain `|` or equal `none`, otherwise two different field splits
//! could produce the same signed bytes.

use chrono::{DateTime, SecondsFormat, Utc};
use receipt_common::encoding::sha256_hex;
use uuid::Uuid;

use crate::certificate::{ResultStatus, RiskTier};

/// Previous-hash sentinel of the first certificate in a ledger.
pub const GENESIS: &str = "GENESIS";

/// Placeholder for absent optional fields in the signed payload.
pub const NONE: &str = "none";

const SEPARATOR: &str = "|";

pub(crate) fn join(fields: &[&str]) -> String {
    fields.join(SEPARATOR)
}

/// Why `value` cannot appear as a plaintext field of the signed payload.
pub fn check_plaintext(value: &str) -> Result<(), &'static str> {
    if value.contains(SEPARATOR) {
        Err("contains the '|' field separator")
    } else if value == NONE {
        Err("is the reserved absent marker \"none\"")
    } else {
        Ok(())
    }
}

fn digest(fields: &[&str]) -> String {
    sha256_hex(join(fields).as_bytes())
}

pub fn hash_intent(action: &str, target: &str) -> String {
    digest(&[action, target])
}

pub fn hash_proposal(summary: &str, step_count: u32) -> String {
    digest(&[summary, &step_count.to_string()])
}

pub fn hash_authorization(token_id: &str, proposal_id: &str, signature: &str) -> String {
    digest(&[token_id, proposal_id, signature])
}

pub fn hash_approver(approver_id: &str) -> String {
    digest(&[approver_id])
}

pub fn hash_result(status: ResultStatus, summary: &str) -> String {
    digest(&[status.as_str(), summary])
}

/// RFC 3339 UTC form, `Z` suffix, with as many fraction digits as the
/// instant carries.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Content hash linking a certificate into the chain.
pub fn content_hash(
    intent_hash: &str,
    proposal_hash: &str,
    authorization_token_hash: &str,
    result_hash: &str,
    timestamp: &DateTime<Utc>,
    previous_certificate_hash: &str,
) -> String {
    digest(&[
        intent_hash,
        proposal_hash,
        authorization_token_hash,
        result_hash,
        &canonical_timestamp(timestamp),
        previous_certificate_hash,
    ])
}

/// Borrowed view of the fields covered by a certificate signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedFields<'a> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub intent_hash: &'a str,
    pub proposal_hash: &'a str,
    pub authorization_token_hash: &'a str,
    pub approver_id_hash: &'a str,
    pub device_key_id: &'a str,
    pub connector_id: Option<&'a str>,
    pub connector_version: Option<&'a str>,
    pub risk_tier: RiskTier,
    pub policy_snapshot_hash: &'a str,
    pub result_hash: &'a str,
    pub previous_certificate_hash: &'a str,
}

impl SignedFields<'_> {
    /// The exact byte sequence that is signed.
    pub fn payload(&self) -> String {
        join(&[
            &self.id.to_string(),
            &canonical_timestamp(&self.timestamp),
            self.intent_hash,
            self.proposal_hash,
            self.authorization_token_hash,
            self.approver_id_hash,
            self.device_key_id,
            self.connector_id.unwrap_or(NONE),
            self.connector_version.unwrap_or(NONE),
            self.risk_tier.as_str(),
            self.policy_snapshot_hash,
            self.result_hash,
            self.previous_certificate_hash,
        ])
    }

    pub fn content_hash(&self) -> String {
        content_hash(
            self.intent_hash,
            self.proposal_hash,
            self.authorization_token_hash,
            self.result_hash,
            &self.timestamp,
            self.previous_certificate_hash,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 11, 10, 30, 0).unwrap()
            + chrono::Duration::milliseconds(125)
    }

    #[test]
    fn field_hash_uses_pipe_join() {
        assert_eq!(
            hash_intent("send_email", "u2"),
            sha256_hex(b"send_email|u2")
        );
        assert_eq!(hash_proposal("plan", 3), sha256_hex(b"plan|3"));
        assert_eq!(hash_approver("u1"), sha256_hex(b"u1"));
        assert_eq!(
            hash_result(ResultStatus::RolledBack, "undo"),
            sha256_hex(b"rolled_back|undo")
        );
    }

    #[test]
    fn timestamp_keeps_millisecond_fraction() {
        assert_eq!(canonical_timestamp(&ts()), "2026-02-11T10:30:00.125Z");
    }

    #[test]
    fn payload_field_order_is_fixed() {
        let id = Uuid::nil();
        let fields = SignedFields {
            id,
            timestamp: ts(),
            intent_hash: "i",
            proposal_hash: "p",
            authorization_token_hash: "a",
            approver_id_hash: "u",
            device_key_id: "d",
            connector_id: None,
            connector_version: Some("2"),
            risk_tier: RiskTier::High,
            policy_snapshot_hash: "s",
            result_hash: "r",
            previous_certificate_hash: GENESIS,
        };
        assert_eq!(
            fields.payload(),
            "00000000-0000-0000-0000-000000000000|2026-02-11T10:30:00.125Z|i|p|a|u|d|none|2|high|s|r|GENESIS"
        );
        assert_eq!(
            fields.content_hash(),
            sha256_hex(b"i|p|a|r|2026-02-11T10:30:00.125Z|GENESIS")
        );
    }

    #[test]
    fn ambiguous_plaintext_is_named() {
        assert!(check_plaintext("mail").is_ok());
        assert!(check_plaintext("None").is_ok());
        assert!(check_plaintext("1.2.0|x").is_err());
        assert!(check_plaintext("|").is_err());
        assert!(check_plaintext(NONE).is_err());
    }

    #[test]
    fn unchecked_connector_split_collides() {
        let base = SignedFields {
            id: Uuid::nil(),
            timestamp: ts(),
            intent_hash: "i",
            proposal_hash: "p",
            authorization_token_hash: "a",
            approver_id_hash: "u",
            device_key_id: "d",
            connector_id: Some("mail"),
            connector_version: Some("1.2.0|x"),
            risk_tier: RiskTier::Low,
            policy_snapshot_hash: "s",
            result_hash: "r",
            previous_certificate_hash: GENESIS,
        };
        let shifted = SignedFields {
            connector_id: Some("mail|1.2.0"),
            connector_version: Some("x"),
            ..base
        };
        let sentinel = SignedFields {
            connector_id: Some(NONE),
            connector_version: Some(NONE),
            ..base
        };
        let absent = SignedFields {
            connector_id: None,
            connector_version: None,
            ..base
        };
        // The join alone cannot tell these apart; check_plaintext has to.
        assert_eq!(base.payload(), shifted.payload());
        assert_eq!(sentinel.payload(), absent.payload());
    }
}
