//! At-rest encryption for persisted profile passwords.
//!
//! # Invariants
//! - Encrypted values carry the `ENC:` prefix; anything else is legacy
//!   plaintext and is returned unchanged by `decrypt`.
//! - A fresh random nonce is used for every encryption.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const ENCRYPTED_PREFIX: &str = "ENC:";
pub const SECRET_KEY_ENV: &str = "WORKLOG_SECRET_KEY";

// Fixed fallback passphrase. Anyone with the binary can decrypt stores
// written under it; set WORKLOG_SECRET_KEY to use a private key.
const BUILTIN_PASSPHRASE: &str = "worklog-profile-store-v1";
const NONCE_LEN: usize = 12;

#[derive(Debug)]
pub enum SecretError {
    Encoding(base64::DecodeError),
    Truncated,
    /// Wrong key or tampered ciphertext.
    Cipher,
    InvalidUtf8,
}

impl Display for SecretError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding(err) => write!(f, "encrypted secret is not valid base64: {err}"),
            Self::Truncated => write!(f, "encrypted secret is too short"),
            Self::Cipher => write!(f, "encrypted secret could not be decrypted"),
            Self::InvalidUtf8 => write!(f, "decrypted secret is not valid UTF-8"),
        }
    }
}

impl Error for SecretError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encoding(err) => Some(err),
            Self::Truncated | Self::Cipher | Self::InvalidUtf8 => None,
        }
    }
}

impl From<base64::DecodeError> for SecretError {
    fn from(value: base64::DecodeError) -> Self {
        Self::Encoding(value)
    }
}

#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0_u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn builtin() -> Self {
        Self::from_passphrase(BUILTIN_PASSPHRASE)
    }

    /// Uses `WORKLOG_SECRET_KEY` when set and non-empty, else the built-in key.
    pub fn from_env() -> Self {
        match std::env::var(SECRET_KEY_ENV) {
            Ok(passphrase) if !passphrase.trim().is_empty() => Self::from_passphrase(&passphrase),
            _ => Self::builtin(),
        }
    }

    pub fn is_encrypted(stored: &str) -> bool {
        stored.starts_with(ENCRYPTED_PREFIX)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let cipher = self.cipher();
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::Cipher)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(payload)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, SecretError> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let payload = STANDARD.decode(encoded)?;
        if payload.len() <= NONCE_LEN {
            return Err(SecretError::Truncated);
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SecretError::Cipher)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::{SecretCipher, SecretError};

    #[test]
    fn encrypt_then_decrypt_restores_plaintext() {
        let cipher = SecretCipher::builtin();
        let stored = cipher.encrypt("s3cret-pw").unwrap();
        assert!(SecretCipher::is_encrypted(&stored));
        assert!(!stored.contains("s3cret-pw"));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "s3cret-pw");
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let cipher = SecretCipher::builtin();
        assert_ne!(cipher.encrypt("pw").unwrap(), cipher.encrypt("pw").unwrap());
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = SecretCipher::builtin();
        assert_eq!(cipher.decrypt("plain-pw").unwrap(), "plain-pw");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let stored = SecretCipher::from_passphrase("a").encrypt("pw").unwrap();
        let err = SecretCipher::from_passphrase("b").decrypt(&stored).unwrap_err();
        assert!(matches!(err, SecretError::Cipher));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = SecretCipher::builtin().decrypt("ENC:AAAA").unwrap_err();
        assert!(matches!(err, SecretError::Truncated));
    }
}
