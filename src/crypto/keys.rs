use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::encryption::EncryptedData;
use super::CryptoError;

#[cfg(not(test))]
pub const PBKDF2_ITERATIONS: u32 = 600_000;
#[cfg(test)]
pub const PBKDF2_ITERATIONS: u32 = 1_000;
pub const KEY_LENGTH: usize = 32; // AES-256
pub const SALT_LENGTH: usize = 16;
const HASH_SCHEME: &str = "pbkdf2_sha256";

/// Service-wide key for at-rest field encryption: zeroed on drop
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct FieldKey {
    key_bytes: [u8; KEY_LENGTH],
}

impl FieldKey {
    pub fn from_bytes(key_bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key_bytes }
    }

    /// Parse the base64 form used in `FIELD_ENCRYPTION_KEY`.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if bytes.len() != KEY_LENGTH {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {len}"
            )));
        }
        let mut key_bytes = [0u8; KEY_LENGTH];
        key_bytes.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key_bytes })
    }

    pub fn generate() -> Self {
        Self {
            key_bytes: random_bytes::<KEY_LENGTH>(),
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key_bytes)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData, CryptoError> {
        EncryptedData::encrypt(&self.key_bytes, plaintext)
    }

    pub fn decrypt(&self, encrypted: &EncryptedData) -> Result<Vec<u8>, CryptoError> {
        encrypted.decrypt(&self.key_bytes)
    }

    /// Encrypt a UTF-8 field into its stored base64 form.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        Ok(self.encrypt(plaintext.as_bytes())?.to_base64())
    }

    pub fn decrypt_str(&self, stored: &str) -> Result<String, CryptoError> {
        let data = EncryptedData::from_base64(stored)?;
        String::from_utf8(self.decrypt(&data)?).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey(..)")
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Hash a password as `pbkdf2_sha256$<iterations>$<salt>$<hash>`.
pub fn hash_password(password: &str) -> String {
    let salt = random_bytes::<SALT_LENGTH>();
    let mut derived = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);
    let encoded = format!(
        "{HASH_SCHEME}${PBKDF2_ITERATIONS}${}${}",
        STANDARD.encode(salt),
        STANDARD.encode(derived)
    );
    derived.zeroize();
    encoded
}

/// Verify a password against a stored hash in constant time.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, CryptoError> {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(CryptoError::MalformedHash);
    };
    if scheme != HASH_SCHEME {
        return Err(CryptoError::MalformedHash);
    }
    let iterations: u32 = iterations.parse().map_err(|_| CryptoError::MalformedHash)?;
    let salt = STANDARD.decode(salt).map_err(|_| CryptoError::MalformedHash)?;
    let expected = STANDARD
        .decode(expected)
        .map_err(|_| CryptoError::MalformedHash)?;

    let mut derived = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut derived);
    let matches: bool = derived.as_slice().ct_eq(expected.as_slice()).into();
    derived.zeroize();
    Ok(matches)
}

/// Random URL-safe bearer token handed to clients.
pub fn generate_session_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<32>())
}

/// 32-character single-use token for clinic invitations.
pub fn generate_invitation_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<24>())
}

/// Only this digest of a token is ever kept server-side.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let stored = hash_password("correct horse");
        assert!(stored.starts_with("pbkdf2_sha256$"));
        assert!(verify_password("correct horse", &stored).unwrap());
        assert!(!verify_password("wrong horse", &stored).unwrap());
    }

    #[test]
    fn same_password_hashes_differently() {
        assert_ne!(hash_password("secret1"), hash_password("secret1"));
    }

    #[test]
    fn malformed_hash_is_rejected() {
        assert!(verify_password("x", "plaintext").is_err());
        assert!(verify_password("x", "md5$1$abc$def").is_err());
        assert!(verify_password("x", "pbkdf2_sha256$many$abc$def").is_err());
    }

    #[test]
    fn field_key_base64_round_trip() {
        let key = FieldKey::generate();
        let restored = FieldKey::from_base64(&key.to_base64()).unwrap();
        let sealed = key.encrypt_str("notes").unwrap();
        assert_eq!(restored.decrypt_str(&sealed).unwrap(), "notes");
    }

    #[test]
    fn field_key_rejects_wrong_length() {
        let short = STANDARD.encode([0u8; 16]);
        assert!(matches!(
            FieldKey::from_base64(&short),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn session_tokens_are_unique_and_hashed() {
        let t1 = generate_session_token();
        let t2 = generate_session_token();
        assert_ne!(t1, t2);
        let h = hash_token(&t1);
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token(&t1));
        assert_ne!(h, t1);
    }

    #[test]
    fn invitation_tokens_are_32_url_safe_characters() {
        let token = generate_invitation_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_invitation_token());
    }
}
