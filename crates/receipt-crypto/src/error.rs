//! Key lifecycle and signing error types.
//!
//! Every variant is fail-closed for certificate issuance. Messages never
//! carry key material or signed payloads.

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("device signing key not found")]
    KeyNotFound,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("public key extraction failed: {0}")]
    PublicKeyExtractionFailed(String),

    #[error("key protection unavailable: {0}")]
    ProtectionUnavailable(String),

    #[error("keystore entry unreadable: {0}")]
    KeystoreCorrupt(String),

    #[error("hardware key store unavailable")]
    HardwareUnavailable,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
