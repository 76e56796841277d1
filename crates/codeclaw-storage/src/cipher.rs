//! At-rest sealing for exported artifacts.
//!
//! Sealed text is `CODECLAW_ENCRYPTED_V1:` followed by base64 of the
//! 96-bit nonce and the AES-256-GCM ciphertext. Text without the prefix is
//! passed through on open, so artifacts written before encryption was
//! enabled stay readable.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;
use std::path::Path;

use crate::salt::restrict_to_owner;

pub const ENCRYPTED_PREFIX: &str = "CODECLAW_ENCRYPTED_V1:";
const NONCE_LEN: usize = 12;

/// Whether `text` was produced by [`ArtifactCipher::seal`]
#[must_use]
pub fn is_sealed(text: &str) -> bool {
    text.starts_with(ENCRYPTED_PREFIX)
}

#[derive(Clone)]
pub struct ArtifactCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for ArtifactCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArtifactCipher { .. }")
    }
}

impl ArtifactCipher {
    /// # Errors
    ///
    /// Returns an error unless `key` is exactly 32 bytes
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| anyhow!("Encryption key must be 32 bytes"))?;
        Ok(Self { cipher })
    }

    /// Load the key stored at `key_path`, if there is one
    ///
    /// # Errors
    ///
    /// Returns an error if the key file exists but is unreadable or malformed
    pub fn load(key_path: &Path) -> Result<Option<Self>> {
        if !key_path.exists() {
            return Ok(None);
        }
        let encoded = std::fs::read_to_string(key_path)
            .with_context(|| format!("Failed to read encryption key from {}", key_path.display()))?;
        let key = BASE64
            .decode(encoded.trim())
            .with_context(|| format!("Encryption key at {} is not base64", key_path.display()))?;
        Self::from_key(&key).map(Some)
    }

    /// Load the key, generating and saving one on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be read or written
    pub fn load_or_create(key_path: &Path) -> Result<Self> {
        if let Some(cipher) = Self::load(key_path)? {
            return Ok(cipher);
        }

        let key = Aes256Gcm::generate_key(&mut OsRng);
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create key directory")?;
        }
        std::fs::write(key_path, BASE64.encode(key))
            .with_context(|| format!("Failed to write encryption key to {}", key_path.display()))?;
        restrict_to_owner(key_path)?;
        log::info!("Encryption key created at {}", key_path.display());

        Self::from_key(&key)
    }

    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {e}"))?;

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(payload)))
    }

    /// Reverse [`ArtifactCipher::seal`]; unsealed text comes back as is
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is truncated, was sealed with another
    /// key, or was modified
    pub fn open(&self, text: &str) -> Result<String> {
        let Some(encoded) = text.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(text.to_string());
        };
        let payload = BASE64
            .decode(encoded.trim())
            .context("Encrypted artifact is not valid base64")?;
        if payload.len() <= NONCE_LEN {
            bail!("Encrypted artifact is truncated");
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("Failed to decrypt artifact; wrong key or modified file"))?;
        String::from_utf8(plaintext).context("Decrypted artifact is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ArtifactCipher {
        ArtifactCipher::from_key(&[0x42; 32]).unwrap()
    }

    #[test]
    fn test_seal_hides_plaintext() {
        let sealed = cipher().seal("{\"session_id\":\"s1\"}").unwrap();
        assert!(is_sealed(&sealed));
        assert!(!sealed.contains("session_id"));
        assert_eq!(cipher().open(&sealed).unwrap(), "{\"session_id\":\"s1\"}");

        // Fresh nonce per seal
        assert_ne!(cipher().seal("same").unwrap(), cipher().seal("same").unwrap());
    }

    #[test]
    fn test_open_passes_plaintext_through() {
        assert_eq!(cipher().open("plain line").unwrap(), "plain line");
    }

    #[test]
    fn test_wrong_key_is_refused() {
        let sealed = cipher().seal("secret").unwrap();
        let other = ArtifactCipher::from_key(&[0x7A; 32]).unwrap();
        assert!(other.open(&sealed).is_err());
        assert!(cipher().open(ENCRYPTED_PREFIX).is_err());
        assert!(ArtifactCipher::from_key(&[1; 16]).is_err());
    }

    #[test]
    fn test_key_file_is_stable_and_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encryption.key");
        assert!(ArtifactCipher::load(&path).unwrap().is_none());

        let first = ArtifactCipher::load_or_create(&path).unwrap();
        let sealed = first.seal("hello").unwrap();
        let second = ArtifactCipher::load_or_create(&path).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), "hello");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
