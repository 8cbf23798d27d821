use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::keys::KEY_LENGTH;
use super::CryptoError;

const NONCE_LENGTH: usize = 12;

/// Encrypted data container: nonce + ciphertext (includes AES-GCM auth tag)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Encrypt plaintext using AES-256-GCM with a random nonce
    pub(crate) fn encrypt(key_bytes: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<Self, CryptoError> {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(Self {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    pub(crate) fn decrypt(&self, key_bytes: &[u8; KEY_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&self.nonce);

        cipher
            .decrypt(nonce, self.ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Serialize to bytes: [12-byte nonce][ciphertext...]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NONCE_LENGTH + self.ciphertext.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LENGTH + 16 {
            // AES-GCM auth tag is 16 bytes minimum
            return Err(CryptoError::CorruptedCiphertext);
        }

        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[..NONCE_LENGTH]);
        let ciphertext = bytes[NONCE_LENGTH..].to_vec();

        Ok(Self { nonce, ciphertext })
    }

    /// Text form stored in TEXT columns.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::CorruptedCiphertext)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::FieldKey;

    fn test_key() -> FieldKey {
        FieldKey::from_bytes([7u8; KEY_LENGTH])
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = test_key();
        let encrypted = key.encrypt(b"Lumbar pain since March").unwrap();
        let decrypted = key.decrypt(&encrypted).unwrap();
        assert_eq!(&decrypted, b"Lumbar pain since March");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key1 = FieldKey::from_bytes([1u8; KEY_LENGTH]);
        let key2 = FieldKey::from_bytes([2u8; KEY_LENGTH]);
        let encrypted = key1.encrypt(b"secret").unwrap();
        assert!(key2.decrypt(&encrypted).is_err());
    }

    #[test]
    fn tampered_ciphertext_detected() {
        let key = test_key();
        let mut tampered = key.encrypt(b"secret data").unwrap();
        tampered.ciphertext[0] ^= 0xFF;
        assert!(key.decrypt(&tampered).is_err());
    }

    #[test]
    fn base64_form_survives_storage() {
        let key = test_key();
        let stored = key.encrypt(b"stored in sqlite").unwrap().to_base64();
        let restored = EncryptedData::from_base64(&stored).unwrap();
        assert_eq!(key.decrypt(&restored).unwrap(), b"stored in sqlite");
    }

    #[test]
    fn from_bytes_rejects_too_short() {
        assert!(EncryptedData::from_bytes(&[0u8; 10]).is_err());
        assert!(EncryptedData::from_base64("not base64!").is_err());
    }

    #[test]
    fn different_encryptions_produce_different_nonces() {
        let key = test_key();
        let e1 = key.encrypt(b"same data").unwrap();
        let e2 = key.encrypt(b"same data").unwrap();
        assert_ne!(e1.nonce, e2.nonce);
    }
}
