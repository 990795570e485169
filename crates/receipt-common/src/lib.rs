//! Receipt Common — shared plumbing for the receipt workspace.
//!
//! Platform data paths, atomic JSON persistence, and hex/base64/SHA-256
//! encoding helpers used by the crypto and ledger crates.

pub mod encoding;
pub mod paths;
pub mod persist;
