//! Device Key Manager.
//!
//! Owns the single device signing key. The key is created lazily on the
//! first [`DeviceKeyManager::ensure_key`] call, in the hardware backend
//! when one is present and otherwise in the software keystore. It is
//! never exported, rotated or deleted here.
//!
//! ```text
//! Absent ──ensure_key──▶ Generating ──ok──▶ Present
//!    ▲                        │
//!    └────────── error ───────┘   (retryable)
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::KeyError;
use crate::hardware::SecureElementBackend;
use crate::keystore::SoftwareKeystore;
use crate::signing;

/// Stable application tag identifying the device signing key.
pub const DEVICE_KEY_TAG: &str = "receipt.device-signing-key";

/// A non-exportable signing key handle.
pub trait DeviceKey: Send + Sync {
    /// Uncompressed SEC1 public key.
    fn public_key(&self) -> Result<Vec<u8>, KeyError>;
    /// ECDSA P-256 over SHA-256 of `payload`, DER-encoded.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, KeyError>;
    fn hardware_backed(&self) -> bool;
}

/// Storage that can hold a device key.
pub trait KeyBackend: Send + Sync {
    fn name(&self) -> &'static str;
    /// Look up an existing key. `Ok(None)` means the tag is unused.
    fn load(&self, tag: &str) -> Result<Option<Arc<dyn DeviceKey>>, KeyError>;
    /// Create a new key under `tag`.
    fn generate(&self, tag: &str) -> Result<Arc<dyn DeviceKey>, KeyError>;
}

/// Observable lifecycle of the device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyState {
    Absent = 0,
    Generating = 1,
    Present = 2,
}

impl KeyState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Generating,
            2 => Self::Present,
            _ => Self::Absent,
        }
    }
}

struct PresentKey {
    handle: Arc<dyn DeviceKey>,
    public_key: Vec<u8>,
    fingerprint: String,
}

pub struct DeviceKeyManager {
    tag: String,
    backend: Box<dyn KeyBackend>,
    key: Mutex<Option<Arc<PresentKey>>>,
    state: AtomicU8,
}

impl DeviceKeyManager {
    pub fn new(backend: Box<dyn KeyBackend>) -> Self {
        Self::with_tag(backend, DEVICE_KEY_TAG)
    }

    pub fn with_tag(backend: Box<dyn KeyBackend>, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            backend,
            key: Mutex::new(None),
            state: AtomicU8::new(KeyState::Absent as u8),
        }
    }

    /// Pick the hardware backend when preferred and present, else the
    /// software keystore under `keystore_dir`.
    pub fn select(keystore_dir: &Path, prefer_hardware: bool) -> Self {
        if prefer_hardware && cfg!(feature = "hardware") {
            if let Some(hw) = SecureElementBackend::probe() {
                tracing::info!("Using hardware secure element for device key");
                return Self::new(Box::new(hw));
            }
        }
        tracing::debug!(dir = %keystore_dir.display(), "Using software keystore for device key");
        Self::new(Box::new(SoftwareKeystore::new(keystore_dir)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn state(&self) -> KeyState {
        KeyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: KeyState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Return the public key, loading or generating the key as needed.
    ///
    /// Fails closed: any backend failure is returned and the manager
    /// stays `Absent`.
    pub fn ensure_key(&self) -> Result<Vec<u8>, KeyError> {
        let mut slot = self.key.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(present) = slot.as_ref() {
            return Ok(present.public_key.clone());
        }

        if let Some(handle) = self.backend.load(&self.tag)? {
            let present = Self::present(handle)?;
            let public_key = present.public_key.clone();
            *slot = Some(present);
            self.set_state(KeyState::Present);
            return Ok(public_key);
        }

        self.set_state(KeyState::Generating);
        let generated = self
            .backend
            .generate(&self.tag)
            .and_then(Self::present);

        match generated {
            Ok(present) => {
                tracing::info!(
                    backend = self.backend.name(),
                    fingerprint = %present.fingerprint,
                    "Device signing key ready"
                );
                let public_key = present.public_key.clone();
                *slot = Some(present);
                self.set_state(KeyState::Present);
                Ok(public_key)
            }
            Err(e) => {
                self.set_state(KeyState::Absent);
                tracing::error!(backend = self.backend.name(), error = %e, "Device key generation failed");
                Err(e)
            }
        }
    }

    /// Public key of an existing device key. Never generates.
    pub fn public_key(&self) -> Result<Vec<u8>, KeyError> {
        Ok(self.existing()?.public_key.clone())
    }

    /// Hex SHA-256 of the public key.
    pub fn fingerprint(&self) -> Result<String, KeyError> {
        Ok(self.existing()?.fingerprint.clone())
    }

    /// Whether the existing key is hardware-resident.
    pub fn hardware_backed(&self) -> Result<bool, KeyError> {
        Ok(self.existing()?.handle.hardware_backed())
    }

    /// Sign `payload` with the device key.
    ///
    /// Safe for concurrent callers: the manager lock is released before
    /// the signing primitive runs.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, KeyError> {
        let present = self.existing()?;
        let signature = present.handle.sign(payload)?;
        tracing::trace!(
            payload_bytes = payload.len(),
            signature_bytes = signature.len(),
            "Payload signed"
        );
        Ok(signature)
    }

    fn existing(&self) -> Result<Arc<PresentKey>, KeyError> {
        let mut slot = self.key.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(present) = slot.as_ref() {
            return Ok(Arc::clone(present));
        }
        let handle = self.backend.load(&self.tag)?.ok_or(KeyError::KeyNotFound)?;
        let present = Self::present(handle)?;
        *slot = Some(Arc::clone(&present));
        self.set_state(KeyState::Present);
        Ok(present)
    }

    fn present(handle: Arc<dyn DeviceKey>) -> Result<Arc<PresentKey>, KeyError> {
        let public_key = handle.public_key()?;
        if public_key.is_empty() {
            return Err(KeyError::PublicKeyExtractionFailed("empty public key".into()));
        }
        let fingerprint = signing::fingerprint(&public_key);
        Ok(Arc::new(PresentKey {
            handle,
            public_key,
            fingerprint,
        }))
    }
}
