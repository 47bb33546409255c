//! At-rest encryption for secret option fields
//!
//! Ciphertexts are stored as `enc:` followed by base64 of nonce || ciphertext
//! (AES-256-GCM, random 96-bit nonce).

use super::{ConfigError, ConfigResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Marker for values written by [`SecretBox::encrypt`]
pub const ENCRYPTED_PREFIX: &str = "enc:";

/// Symmetric key used to seal secret fields
#[derive(Clone)]
pub struct SecretBox {
    key: [u8; KEY_LEN],
}

impl fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Derive the key from an operator supplied passphrase
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Read a base64 key file, creating it with a random key on first use
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            let encoded = fs::read_to_string(path)?;
            let bytes = BASE64_STANDARD
                .decode(encoded.trim())
                .map_err(|e| ConfigError::Crypto(format!("Invalid key file: {}", e)))?;
            let key: [u8; KEY_LEN] = bytes
                .try_into()
                .map_err(|_| ConfigError::Crypto("Key file must hold 32 bytes".to_string()))?;
            return Ok(Self { key });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let secret = Self::generate();
        fs::write(path, BASE64_STANDARD.encode(secret.key))?;
        tracing::info!("Generated new secret key at {}", path.display());

        Ok(secret)
    }

    fn cipher(&self) -> ConfigResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| ConfigError::Crypto(format!("AES init: {}", e)))
    }

    /// Seal a plaintext value
    pub fn encrypt(&self, plaintext: &str) -> ConfigResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| ConfigError::Crypto(format!("AES encrypt: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64_STANDARD.encode(sealed)))
    }

    /// Open a sealed value
    pub fn decrypt(&self, sealed: &str) -> ConfigResult<String> {
        let encoded = sealed
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| ConfigError::Crypto("Value is not encrypted".to_string()))?;
        let bytes = BASE64_STANDARD
            .decode(encoded)
            .map_err(|e| ConfigError::Crypto(format!("Invalid encoding: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(ConfigError::Crypto("Ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ConfigError::Crypto("Decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| ConfigError::Crypto(format!("Decrypted value is not UTF-8: {}", e)))
    }
}

/// Whether a stored value was produced by [`SecretBox::encrypt`]
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_encrypt_decrypt() {
        let secret = SecretBox::from_passphrase("correct horse");
        let sealed = secret.encrypt("hunter2").unwrap();

        assert!(is_encrypted(&sealed));
        assert!(!sealed.contains("hunter2"));
        assert_eq!(secret.decrypt(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SecretBox::from_passphrase("one").encrypt("hunter2").unwrap();
        assert!(SecretBox::from_passphrase("two").decrypt(&sealed).is_err());
        assert!(SecretBox::generate().decrypt("plain").is_err());
    }

    #[test]
    fn test_key_file_is_reused() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("keys").join("secret.key");

        let first = SecretBox::load_or_create(&path).unwrap();
        let sealed = first.encrypt("token").unwrap();
        let second = SecretBox::load_or_create(&path).unwrap();

        assert_eq!(second.decrypt(&sealed).unwrap(), "token");
    }
}
