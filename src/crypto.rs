//! Passphrase encryption at rest for stored message bodies.
//!
//! Key derivation is Argon2id over a random per-store salt persisted next
//! to the database file; bodies are sealed with AES-256-GCM and stored as
//! base64(nonce ‖ ciphertext). Embeddings are computed from plaintext
//! before sealing, so vectors are never encrypted.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use std::path::Path;

use crate::error::{Error, Result};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const MIN_PASSPHRASE_LEN: usize = 8;

/// Symmetric cipher for message bodies, derived once per process from the
/// user's passphrase and the store's salt file.
pub struct BodyCipher {
    cipher: Aes256Gcm,
}

impl BodyCipher {
    /// Derive a cipher from `passphrase` and the salt stored at
    /// `salt_path`. Creates the salt file on first use.
    pub fn derive(passphrase: &str, salt_path: &Path) -> Result<Self> {
        if passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(Error::Crypto(format!(
                "passphrase must be at least {} characters",
                MIN_PASSPHRASE_LEN
            )));
        }

        let salt = load_or_create_salt(salt_path)?;

        let mut key = [0u8; 32];
        argon2::Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Crypto(format!("cipher init failed: {}", e)))?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ct.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ct);
        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|_| Error::Crypto("stored body is not valid ciphertext".into()))?;

        if sealed.len() < NONCE_LEN {
            return Err(Error::Crypto("stored body is truncated".into()));
        }

        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| Error::Crypto("passphrase does not match this index".into()))?;

        String::from_utf8(plain).map_err(|_| Error::Crypto("decrypted body is not UTF-8".into()))
    }
}

fn load_or_create_salt(salt_path: &Path) -> Result<Vec<u8>> {
    if salt_path.exists() {
        let salt = std::fs::read(salt_path)
            .map_err(|e| Error::Crypto(format!("failed to read salt file: {}", e)))?;
        if salt.len() != SALT_LEN {
            return Err(Error::Crypto("salt file is corrupt".into()));
        }
        return Ok(salt);
    }

    if let Some(parent) = salt_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Crypto(format!("failed to create data dir: {}", e)))?;
    }

    let mut salt = vec![0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    std::fs::write(salt_path, &salt)
        .map_err(|e| Error::Crypto(format!("failed to write salt file: {}", e)))?;
    Ok(salt)
}

/// Salt file path for a given database path (`mail.db` → `mail.db.salt`).
pub fn salt_path_for(db_path: &Path) -> std::path::PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mail.db".to_string());
    name.push_str(".salt");
    db_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let salt = tmp.path().join("mail.db.salt");
        let cipher = BodyCipher::derive("correct horse battery", &salt).unwrap();

        let sealed = cipher.encrypt("hello inbox").unwrap();
        assert_ne!(sealed, "hello inbox");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hello inbox");
    }

    #[test]
    fn same_salt_interoperates_across_derives() {
        let tmp = tempfile::tempdir().unwrap();
        let salt = tmp.path().join("mail.db.salt");

        let sealed = BodyCipher::derive("correct horse battery", &salt)
            .unwrap()
            .encrypt("persisted")
            .unwrap();
        let reopened = BodyCipher::derive("correct horse battery", &salt).unwrap();
        assert_eq!(reopened.decrypt(&sealed).unwrap(), "persisted");
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let salt = tmp.path().join("mail.db.salt");

        let sealed = BodyCipher::derive("correct horse battery", &salt)
            .unwrap()
            .encrypt("secret")
            .unwrap();
        let wrong = BodyCipher::derive("incorrect passphrase", &salt).unwrap();
        assert!(matches!(wrong.decrypt(&sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn short_passphrase_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let salt = tmp.path().join("mail.db.salt");
        assert!(BodyCipher::derive("short", &salt).is_err());
    }

    #[test]
    fn salt_path_appends_suffix() {
        let p = salt_path_for(Path::new("/data/mail.db"));
        assert_eq!(p, Path::new("/data/mail.db.salt"));
    }
}
