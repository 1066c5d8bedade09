//! Encrypted session backup.
//!
//! Device databases are shipped to a remote store as
//! `base64(nonce || AES-256-GCM ciphertext)` with a random 96-bit nonce.
//! Without a valid 32-byte key the whole feature is off; nothing ever
//! leaves the box unencrypted.

use crate::error::{Error, Result};
use crate::types::UserId;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use zeroize::Zeroizing;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

/// Size of the backup encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM cipher for session backups.
pub struct SessionCipher {
    key: [u8; KEY_SIZE],
}

impl SessionCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse a base64-encoded key. Returns None when the encoding is
    /// invalid or the key is not exactly 32 bytes; callers treat that
    /// as "persistence disabled".
    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = BASE64.decode(encoded).ok()?;
        let key: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self::new(key))
    }

    /// Encrypt with a random nonce, prepending it to the output, then
    /// base64-encode: `base64(nonce || ciphertext || tag)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Crypto("encryption failed".into()))?;
        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(output))
    }

    /// Decrypt data produced by [`encrypt`](Self::encrypt).
    ///
    /// Returns a generic error on failure; the plaintext container is
    /// zeroized on drop.
    pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
        let data = BASE64
            .decode(encoded)
            .map_err(|_| Error::Crypto("invalid base64 ciphertext".into()))?;
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed".into()))?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    data: String,
}

/// HTTP client for the remote session backup endpoint.
pub struct BackupStore {
    base_url: String,
    http: reqwest::Client,
}

impl BackupStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch the stored ciphertext for a user. 404, non-2xx, and empty
    /// payloads all mean "no backup".
    pub async fn fetch(&self, user_id: UserId) -> Result<Option<String>> {
        let url = format!("{}/api/whatsapp/session?user_id={}", self.base_url, user_id);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: FetchResponse = match resp.json().await {
            Ok(body) => body,
            Err(_) => return Ok(None),
        };
        if body.data.is_empty() {
            return Ok(None);
        }
        Ok(Some(body.data))
    }

    /// Store ciphertext for a user.
    pub async fn store(&self, user_id: UserId, data: &str) -> Result<()> {
        let url = format!("{}/api/whatsapp/session", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "user_id": user_id, "data": data }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Backup(format!(
                "save failed: {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SessionCipher {
        SessionCipher::new([42u8; KEY_SIZE])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let plaintext = vec![7u8; 2048];
        let encoded = cipher().encrypt(&plaintext).unwrap();
        let decrypted = cipher().decrypt(&encoded).unwrap();
        assert_eq!(&*decrypted, &plaintext);
    }

    #[test]
    fn nonces_are_unique() {
        let c = cipher();
        let a = c.encrypt(b"same plaintext").unwrap();
        let b = c.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let encoded = cipher().encrypt(b"secret").unwrap();
        let other = SessionCipher::new([43u8; KEY_SIZE]);
        assert!(other.decrypt(&encoded).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let encoded = cipher().encrypt(b"secret").unwrap();
        let mut raw = BASE64.decode(&encoded).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(cipher().decrypt(&BASE64.encode(raw)).is_err());
    }

    #[test]
    fn short_ciphertext_fails() {
        assert!(cipher().decrypt(&BASE64.encode([0u8; 8])).is_err());
        assert!(cipher().decrypt("not base64 !!!").is_err());
    }

    #[test]
    fn key_parsing_enforces_length() {
        assert!(SessionCipher::from_base64(&BASE64.encode([1u8; 32])).is_some());
        assert!(SessionCipher::from_base64(&BASE64.encode([1u8; 16])).is_none());
        assert!(SessionCipher::from_base64(&BASE64.encode([1u8; 33])).is_none());
        assert!(SessionCipher::from_base64("@@@not-base64@@@").is_none());
    }

    #[test]
    fn ciphertext_layout() {
        let encoded = cipher().encrypt(b"x").unwrap();
        let raw = BASE64.decode(encoded).unwrap();
        assert_eq!(raw.len(), NONCE_SIZE + 1 + TAG_SIZE);
    }
}
