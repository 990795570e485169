//! ECDSA P-256 signing and verification.
//!
//! Signatures are computed over the SHA-256 digest of the payload and
//! DER-encoded. Public keys travel as uncompressed SEC1 points.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

use receipt_common::encoding::sha256_hex;

/// Sign `data` and return the DER-encoded signature bytes.
pub fn sign_bytes(key: &SigningKey, data: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign(data);
    sig.to_der().as_bytes().to_vec()
}

/// Uncompressed SEC1 encoding (`0x04 || X || Y`, 65 bytes) of a public key.
pub fn public_key_bytes(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

/// Hex SHA-256 of the SEC1 public key bytes. Used as the device key id.
pub fn fingerprint(public_key: &[u8]) -> String {
    sha256_hex(public_key)
}

/// Verify a DER signature against a SEC1-encoded P-256 public key.
///
/// Returns `false` for malformed keys or signatures rather than erroring.
pub fn verify_signature(public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(sig) = Signature::from_der(signature) else {
        return false;
    };
    verifying_key.verify(data, &sig).is_ok()
}
