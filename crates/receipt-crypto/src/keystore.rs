//! Software keystore: the fallback home for the device signing key.
//!
//! The private key is PKCS#8 DER encrypted with AES-256-GCM under a key
//! derived by Argon2id from the device secret. The device secret is a
//! random 32-byte value in `device.secret`, created owner-only on first
//! use, or supplied through `RECEIPT_KEYSTORE_SECRET`. If the secret
//! cannot be established with those protections, no key is created.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::Argon2;
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use receipt_common::encoding::hex_encode;
use receipt_common::persist;

use crate::device::{DeviceKey, KeyBackend};
use crate::error::KeyError;
use crate::signing;

/// Environment override for the keystore secret.
pub const KEYSTORE_SECRET_ENV: &str = "RECEIPT_KEYSTORE_SECRET";

const DEVICE_SECRET_FILENAME: &str = "device.secret";
const DEVICE_SECRET_LEN: usize = 32;

/// Salt length for Argon2id key derivation.
const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM.
const NONCE_LEN: usize = 12;

/// Encrypted key material stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Where the keystore gets the secret that wraps the private key.
enum SecretSource {
    Explicit(Zeroizing<String>),
    DeviceFile,
}

/// File-backed keystore holding encrypted device keys.
pub struct SoftwareKeystore {
    dir: PathBuf,
    secret: SecretSource,
}

impl SoftwareKeystore {
    /// Keystore rooted at `dir`, honouring `RECEIPT_KEYSTORE_SECRET` when set.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let secret = match std::env::var(KEYSTORE_SECRET_ENV) {
            Ok(s) if !s.is_empty() => SecretSource::Explicit(Zeroizing::new(s)),
            _ => SecretSource::DeviceFile,
        };
        Self {
            dir: dir.into(),
            secret,
        }
    }

    /// Keystore with an explicit wrapping secret.
    pub fn with_secret(dir: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            secret: SecretSource::Explicit(Zeroizing::new(secret.into())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{tag}.enc"))
    }

    /// Resolve the wrapping secret. `create` allows minting the device secret.
    fn wrapping_secret(&self, create: bool) -> Result<Zeroizing<String>, KeyError> {
        match &self.secret {
            SecretSource::Explicit(s) => Ok(s.clone()),
            SecretSource::DeviceFile => {
                let path = self.dir.join(DEVICE_SECRET_FILENAME);
                if path.exists() {
                    read_device_secret(&path)
                } else if create {
                    create_device_secret(&path)
                } else {
                    Err(KeyError::ProtectionUnavailable(
                        "device secret missing".into(),
                    ))
                }
            }
        }
    }
}

impl KeyBackend for SoftwareKeystore {
    fn name(&self) -> &'static str {
        "software-keystore"
    }

    fn load(&self, tag: &str) -> Result<Option<Arc<dyn DeviceKey>>, KeyError> {
        let path = self.key_path(tag);
        let Some(encrypted) = persist::read_json_if_exists::<EncryptedKey>(&path)
            .map_err(|e| KeyError::KeystoreCorrupt(e.to_string()))?
        else {
            return Ok(None);
        };

        let secret = self.wrapping_secret(false)?;
        let signing_key = decrypt_key(&encrypted, &secret)?;
        tracing::debug!(tag, "Device key loaded from software keystore");
        Ok(Some(Arc::new(SoftwareKey { signing_key })))
    }

    fn generate(&self, tag: &str) -> Result<Arc<dyn DeviceKey>, KeyError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| KeyError::ProtectionUnavailable(format!("keystore dir: {e}")))?;
        let secret = self.wrapping_secret(true)?;

        let signing_key = SigningKey::random(&mut OsRng);
        let encrypted = encrypt_key(&signing_key, &secret)?;
        persist::write_json_pretty(&self.key_path(tag), &encrypted)
            .map_err(|e| KeyError::KeyGenerationFailed(format!("persist: {e}")))?;
        restrict_permissions(&self.key_path(tag))?;

        tracing::info!(tag, "Device key generated in software keystore");
        Ok(Arc::new(SoftwareKey { signing_key }))
    }
}

/// A P-256 key held in process memory after decryption.
struct SoftwareKey {
    signing_key: SigningKey,
}

impl DeviceKey for SoftwareKey {
    fn public_key(&self) -> Result<Vec<u8>, KeyError> {
        Ok(signing::public_key_bytes(self.signing_key.verifying_key()))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, KeyError> {
        Ok(signing::sign_bytes(&self.signing_key, payload))
    }

    fn hardware_backed(&self) -> bool {
        false
    }
}

/// Encrypt a signing key for storage at rest.
pub fn encrypt_key(key: &SigningKey, secret: &str) -> Result<EncryptedKey, KeyError> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| KeyError::KeyGenerationFailed(format!("key encoding: {e}")))?;

    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let aes_key = derive_aes_key(secret, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key[..])
        .map_err(|e| KeyError::ProtectionUnavailable(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(&Nonce::from(nonce_bytes), der.as_bytes())
        .map_err(|e| KeyError::ProtectionUnavailable(e.to_string()))?;

    Ok(EncryptedKey {
        ciphertext,
        salt,
        nonce: nonce_bytes.to_vec(),
    })
}

/// Decrypt a signing key from encrypted storage.
pub fn decrypt_key(encrypted: &EncryptedKey, secret: &str) -> Result<SigningKey, KeyError> {
    let aes_key = derive_aes_key(secret, &encrypted.salt)?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key[..])
        .map_err(|e| KeyError::KeystoreCorrupt(e.to_string()))?;

    let nonce_arr: [u8; NONCE_LEN] = encrypted
        .nonce
        .clone()
        .try_into()
        .map_err(|_| KeyError::KeystoreCorrupt("invalid nonce length".into()))?;
    let mut plaintext = cipher
        .decrypt(&Nonce::from(nonce_arr), encrypted.ciphertext.as_ref())
        .map_err(|_| KeyError::KeystoreCorrupt("decryption failed (wrong secret?)".into()))?;

    let key = SigningKey::from_pkcs8_der(&plaintext)
        .map_err(|e| KeyError::KeystoreCorrupt(format!("key encoding: {e}")));
    plaintext.zeroize();
    key
}

/// Derive a 256-bit AES key from the wrapping secret using Argon2id.
fn derive_aes_key(secret: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(secret.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeyError::ProtectionUnavailable(format!("key derivation: {e}")))?;
    Ok(key)
}

fn create_device_secret(path: &Path) -> Result<Zeroizing<String>, KeyError> {
    use std::io::Write;

    let mut raw = [0u8; DEVICE_SECRET_LEN];
    OsRng.fill_bytes(&mut raw);
    let secret = Zeroizing::new(hex_encode(&raw));
    raw.zeroize();

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|e| KeyError::ProtectionUnavailable(format!("device secret: {e}")))?;
    file.write_all(secret.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| KeyError::ProtectionUnavailable(format!("device secret: {e}")))?;

    tracing::info!(path = %path.display(), "Device secret created");
    Ok(secret)
}

fn read_device_secret(path: &Path) -> Result<Zeroizing<String>, KeyError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(KeyError::ProtectionUnavailable(format!(
                "device secret is accessible to other users (mode {:o})",
                mode & 0o777
            )));
        }
    }
    let secret = Zeroizing::new(std::fs::read_to_string(path)?.trim().to_string());
    if secret.is_empty() {
        return Err(KeyError::ProtectionUnavailable("device secret is empty".into()));
    }
    Ok(secret)
}

fn restrict_permissions(path: &Path) -> Result<(), KeyError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| KeyError::ProtectionUnavailable(format!("key file permissions: {e}")))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("receipt-keystore-{name}-{nanos}"))
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = SigningKey::random(&mut OsRng);
        let encrypted = encrypt_key(&key, "secret").unwrap();
        let decrypted = decrypt_key(&encrypted, "secret").unwrap();
        assert_eq!(key.verifying_key(), decrypted.verifying_key());
    }

    #[test]
    fn wrong_secret_fails() {
        let key = SigningKey::random(&mut OsRng);
        let encrypted = encrypt_key(&key, "correct").unwrap();
        assert!(matches!(
            decrypt_key(&encrypted, "wrong"),
            Err(KeyError::KeystoreCorrupt(_))
        ));
    }

    #[test]
    fn generate_then_load_returns_same_public_key() {
        let dir = temp_dir("gen-load");
        let store = SoftwareKeystore::with_secret(&dir, "test-secret");

        assert!(store.load("device").unwrap().is_none());
        let generated = store.generate("device").unwrap();
        let loaded = store.load("device").unwrap().unwrap();
        assert_eq!(generated.public_key().unwrap(), loaded.public_key().unwrap());
        assert!(!loaded.hardware_backed());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn device_secret_is_created_owner_only() {
        let dir = temp_dir("device-secret");
        let store = SoftwareKeystore {
            dir: dir.clone(),
            secret: SecretSource::DeviceFile,
        };

        store.generate("device").unwrap();
        let secret_path = dir.join(DEVICE_SECRET_FILENAME);
        assert!(secret_path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&secret_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }

        assert!(store.load("device").unwrap().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_device_secret_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir("loose-secret");
        let store = SoftwareKeystore {
            dir: dir.clone(),
            secret: SecretSource::DeviceFile,
        };
        store.generate("device").unwrap();
        let secret_path = dir.join(DEVICE_SECRET_FILENAME);
        std::fs::set_permissions(&secret_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(matches!(
            store.load("device"),
            Err(KeyError::ProtectionUnavailable(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_keystore_fails_closed() {
        let dir = temp_dir("blocked");
        std::fs::create_dir_all(dir.parent().unwrap()).unwrap();
        // A regular file where the keystore directory should be.
        std::fs::write(&dir, b"not a directory").unwrap();

        let store = SoftwareKeystore::with_secret(&dir, "secret");
        assert!(store.generate("device").is_err());
        let _ = std::fs::remove_file(&dir);
    }
}
