//! Password-based encryption for wallet containers
//!
//! - Argon2id derives a 32-byte key-encryption key from the password
//! - ChaCha20-Poly1305 seals each secret with a fresh random nonce
//!
//! Associated data binds a ciphertext to the record it belongs to, so
//! records swapped between accounts fail to open.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid key derivation parameters")]
    InvalidParams,
    #[error("Key derivation failed")]
    KeyDerivation,
    #[error("Encryption failed")]
    Encryption,
    #[error("Ciphertext failed authentication")]
    Authentication,
    #[error("Malformed ciphertext encoding")]
    Malformed,
}

/// Argon2id cost parameters, stored alongside each wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests
    #[cfg(test)]
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Key-encryption key, wiped on drop
pub type Kek = Zeroizing<[u8; KEY_LEN]>;

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the key-encryption key for `password`
pub fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<Kek, CipherError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|_| CipherError::InvalidParams)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|_| CipherError::KeyDerivation)?;
    Ok(key)
}

/// Nonce and ciphertext, hex encoded for the container file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    pub nonce: String,
    pub ciphertext: String,
}

pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<SealedBox, CipherError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CipherError::Encryption)?;

    Ok(SealedBox {
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

pub fn open(
    key: &[u8; KEY_LEN],
    sealed: &SealedBox,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let nonce_bytes = hex::decode(&sealed.nonce).map_err(|_| CipherError::Malformed)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CipherError::Malformed);
    }
    let ciphertext = hex::decode(&sealed.ciphertext).map_err(|_| CipherError::Malformed)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad,
            },
        )
        .map_err(|_| CipherError::Authentication)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let salt = random_salt();
        let key = derive_key("p1", &salt, &KdfParams::insecure_fast()).unwrap();
        let sealed = seal(&key, b"secret", b"aad").unwrap();
        assert_eq!(&*open(&key, &sealed, b"aad").unwrap(), b"secret");
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let salt = random_salt();
        let params = KdfParams::insecure_fast();
        let key = derive_key("p1", &salt, &params).unwrap();
        let other = derive_key("p2", &salt, &params).unwrap();
        let sealed = seal(&key, b"secret", b"").unwrap();
        assert_eq!(open(&other, &sealed, b""), Err(CipherError::Authentication));
    }

    #[test]
    fn test_aad_is_bound() {
        let key = derive_key("p1", &random_salt(), &KdfParams::insecure_fast()).unwrap();
        let sealed = seal(&key, b"secret", b"account-a").unwrap();
        assert!(open(&key, &sealed, b"account-b").is_err());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = derive_key("p1", &random_salt(), &KdfParams::insecure_fast()).unwrap();
        let a = seal(&key, b"secret", b"").unwrap();
        let b = seal(&key, b"secret", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_malformed_nonce() {
        let key = derive_key("p1", &random_salt(), &KdfParams::insecure_fast()).unwrap();
        let mut sealed = seal(&key, b"secret", b"").unwrap();
        sealed.nonce = "abcd".to_string();
        assert_eq!(open(&key, &sealed, b""), Err(CipherError::Malformed));
    }
}
