//! Receipt Crypto — device-bound signing keys.
//!
//! Provides the device key manager (hardware-first, software keystore
//! fallback), ECDSA P-256 signing and verification over SEC1 public
//! keys, and public key fingerprinting.

pub mod device;
pub mod error;
pub mod hardware;
pub mod keystore;
pub mod signing;

pub use device::{DeviceKeyManager, KeyState};
pub use error::KeyError;
