//! Hardware secure element backend (best-effort).
//!
//! The key manager only probes when built with the `hardware` feature.
//! Until a platform driver is wired in, probing reports the secure
//! element as absent and the key manager falls back to the software
//! keystore.

use std::sync::Arc;

use crate::device::{DeviceKey, KeyBackend};
use crate::error::KeyError;

/// Whether a secure element driver is present on this device.
pub fn is_available() -> bool {
    false
}

/// Whether this device's secure element vouches that it holds the
/// private half of `public_key`.
///
/// Nothing can vouch without a driver, so an enclave-backed claim on a
/// certificate never verifies.
pub fn attests(public_key: &[u8]) -> bool {
    SecureElementBackend::probe().is_some_and(|se| se.holds(public_key))
}

/// Key backend resident in a secure element. Keys never leave the chip.
pub struct SecureElementBackend {
    _private: (),
}

impl SecureElementBackend {
    /// Returns a backend only if a secure element was detected.
    pub fn probe() -> Option<Self> {
        if is_available() {
            Some(Self { _private: () })
        } else {
            tracing::debug!("No hardware secure element detected");
            None
        }
    }

    fn holds(&self, _public_key: &[u8]) -> bool {
        false
    }
}

impl KeyBackend for SecureElementBackend {
    fn name(&self) -> &'static str {
        "secure-element"
    }

    fn load(&self, _tag: &str) -> Result<Option<Arc<dyn DeviceKey>>, KeyError> {
        Err(KeyError::HardwareUnavailable)
    }

    fn generate(&self, _tag: &str) -> Result<Arc<dyn DeviceKey>, KeyError> {
        Err(KeyError::HardwareUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_without_driver_returns_none() {
        assert!(!is_available());
        assert!(SecureElementBackend::probe().is_none());
    }

    #[test]
    fn nothing_is_attested_without_a_driver() {
        assert!(!attests(&[0x04; 65]));
    }
}
