//! Local storage of the last activation code.
//!
//! The file layout is `nonce (12 bytes) || ChaCha20-Poly1305 ciphertext`,
//! keyed by a hash of the device identity. This only keeps the code out of
//! plain sight; it is not a security boundary. When encryption fails the
//! code is written as plaintext, and [`SecretStore::load`] accepts both.

use crate::error::{LicenseError, LicenseResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of the nonce prefix (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag appended to the ciphertext.
const TAG_SIZE: usize = 16;

const KEY_CONTEXT: &[u8] = b"modlink.activation.v1";

/// Encrypted-at-rest store for the activation code.
pub struct SecretStore {
    path: PathBuf,
    key: [u8; 32],
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SecretStore {
    /// Creates a store whose key is derived from `device_id`.
    pub fn new(path: impl Into<PathBuf>, device_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(device_id.as_bytes());
        Self {
            path: path.into(),
            key: hasher.finalize().into(),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `code`, replacing any previous value.
    pub fn save(&self, code: &str) -> LicenseResult<()> {
        let bytes = match self.encrypt(code.as_bytes()) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "Activation code encryption failed; storing plaintext");
                code.as_bytes().to_vec()
            }
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LicenseError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        fs::write(&self.path, bytes)
            .map_err(|e| LicenseError::Storage(format!("write {}: {e}", self.path.display())))
    }

    /// Loads the stored code, if any.
    pub fn load(&self) -> LicenseResult<Option<String>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LicenseError::Storage(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if bytes.is_empty() {
            return Ok(None);
        }

        match self.decrypt(&bytes) {
            Ok(plain) => Ok(Some(String::from_utf8(plain).map_err(|e| {
                LicenseError::Crypto(format!("stored code is not UTF-8: {e}"))
            })?)),
            Err(e) => {
                debug!(error = %e, "Stored activation code is not encrypted; reading as plaintext");
                String::from_utf8(bytes).map(Some).map_err(|_| {
                    LicenseError::Crypto("stored code is neither ciphertext nor text".into())
                })
            }
        }
    }

    /// Removes the stored code.
    pub fn clear(&self) -> LicenseResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Storage(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> LicenseResult<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| LicenseError::Crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> LicenseResult<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(LicenseError::Crypto("data too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| LicenseError::Crypto("decryption failed (wrong key or tampered data)".into()))
    }
}
