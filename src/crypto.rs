//! Token sealing with AES-256-GCM.
//!
//! Access and refresh tokens are stored as ciphertext. Each sealed token is
//! bound to its owning integration through additional authenticated data
//! (`"{integration_id}|{system_type}"`), so ciphertext copied onto another
//! integration row fails to open.
//!
//! Sealed layout: `format (1) | nonce (12) | ciphertext + tag (16)`.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::models::SystemType;

/// Raw key length for AES-256.
pub const KEY_LEN: usize = 32;

const SEALED_FORMAT_V1: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("sealing token failed")]
    Seal,
    #[error("opening token failed: wrong key or integration binding")]
    Open,
    #[error("sealed token is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("unknown sealed token format {0:#04x}")]
    UnknownFormat(u8),
    #[error("opened token is not UTF-8")]
    NotUtf8,
}

/// Key material for sealing tokens; wiped from memory on drop.
#[derive(Clone)]
pub struct CryptoKey(Zeroizing<[u8; KEY_LEN]>);

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(bytes);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.0.as_slice())
            .map_err(|_| CryptoError::InvalidKeyLength(self.0.len()))
    }
}

/// The integration a sealed token belongs to.
fn binding(integration_id: Uuid, system_type: SystemType) -> String {
    format!("{}|{}", integration_id, system_type.as_str())
}

fn seal(key: &CryptoKey, binding: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let body = key
        .cipher()?
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: binding,
            },
        )
        .map_err(|_| CryptoError::Seal)?;

    let mut sealed = Vec::with_capacity(HEADER_LEN + body.len());
    sealed.push(SEALED_FORMAT_V1);
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

fn open(key: &CryptoKey, binding: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match sealed.first() {
        None => return Err(CryptoError::Truncated(0)),
        Some(&SEALED_FORMAT_V1) => {}
        Some(&other) => return Err(CryptoError::UnknownFormat(other)),
    }
    if sealed.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Truncated(sealed.len()));
    }

    let (header, body) = sealed.split_at(HEADER_LEN);
    key.cipher()?
        .decrypt(
            Nonce::from_slice(&header[1..]),
            Payload {
                msg: body,
                aad: binding,
            },
        )
        .map_err(|_| CryptoError::Open)
}

/// Seal one token secret for the given integration.
pub fn encrypt_token(
    key: &CryptoKey,
    integration_id: Uuid,
    system_type: SystemType,
    token: &str,
) -> Result<Vec<u8>, CryptoError> {
    seal(
        key,
        binding(integration_id, system_type).as_bytes(),
        token.as_bytes(),
    )
}

/// Open a sealed token; fails unless it was sealed for this integration.
pub fn decrypt_token(
    key: &CryptoKey,
    integration_id: Uuid,
    system_type: SystemType,
    sealed: &[u8],
) -> Result<Zeroizing<String>, CryptoError> {
    let bytes = open(key, binding(integration_id, system_type).as_bytes(), sealed)?;
    String::from_utf8(bytes)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::NotUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> CryptoKey {
        CryptoKey::new(vec![fill; KEY_LEN]).unwrap()
    }

    #[test]
    fn sealed_token_opens_only_for_its_integration() {
        let key = key(0);
        let integration_id = Uuid::new_v4();

        let sealed =
            encrypt_token(&key, integration_id, SystemType::Salesforce, "00Dxx!token").unwrap();
        assert_eq!(sealed[0], SEALED_FORMAT_V1);
        assert_eq!(sealed.len(), HEADER_LEN + "00Dxx!token".len() + TAG_LEN);

        let opened = decrypt_token(&key, integration_id, SystemType::Salesforce, &sealed).unwrap();
        assert_eq!(opened.as_str(), "00Dxx!token");

        assert!(matches!(
            decrypt_token(&key, Uuid::new_v4(), SystemType::Salesforce, &sealed),
            Err(CryptoError::Open)
        ));
        assert!(matches!(
            decrypt_token(&key, integration_id, SystemType::Jira, &sealed),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn sealing_twice_differs() {
        let key = key(0);
        let id = Uuid::new_v4();
        let a = encrypt_token(&key, id, SystemType::Jira, "same").unwrap();
        let b = encrypt_token(&key, id, SystemType::Jira, "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn other_key_cannot_open() {
        let id = Uuid::new_v4();
        let sealed = encrypt_token(&key(0), id, SystemType::Jira, "secret").unwrap();
        assert!(matches!(
            decrypt_token(&key(1), id, SystemType::Jira, &sealed),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let key = key(0);
        let id = Uuid::new_v4();
        assert!(matches!(
            decrypt_token(&key, id, SystemType::Jira, &[]),
            Err(CryptoError::Truncated(0))
        ));
        assert!(matches!(
            decrypt_token(&key, id, SystemType::Jira, b"plaintext-token"),
            Err(CryptoError::UnknownFormat(b'p'))
        ));
        assert!(matches!(
            decrypt_token(&key, id, SystemType::Jira, &[SEALED_FORMAT_V1, 0, 0]),
            Err(CryptoError::Truncated(3))
        ));
    }

    #[test]
    fn key_length_enforced_and_redacted() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 31]),
            Err(CryptoError::InvalidKeyLength(31))
        ));
        assert_eq!(format!("{:?}", key(7)), "CryptoKey([REDACTED])");
    }
}
