//! Policy snapshot supplied by the caller at build time.

use std::collections::BTreeMap;

use receipt_common::encoding::sha256_hex;
use serde::{Deserialize, Serialize};

/// Policy and feature-flag state in force when a certificate is sealed.
///
/// Flags are kept ordered so the canonical form does not depend on
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub version: String,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl PolicySnapshot {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            flags: BTreeMap::new(),
        }
    }

    pub fn with_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    /// `version|name=bool|name=bool…` with flags in ascending name order.
    pub fn canonical(&self) -> String {
        let mut out = self.version.clone();
        for (name, enabled) in &self.flags {
            out.push_str(&format!("|{name}={enabled}"));
        }
        out
    }

    pub fn hash(&self) -> String {
        sha256_hex(self.canonical().as_bytes())
    }
}
