//! ECDSA key management
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve. Long-lived code never holds a [`KeyPair`]
//! for a custodied account; the vault hands out a [`SigningKey`] for the
//! duration of one signing call and the key erases itself on drop.

use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use zeroize::Zeroizing;

use super::address::{Address, Network};
use super::hash::sha256;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Scope ids of signing keys that have been erased
#[cfg(test)]
static ERASED_SCOPES: std::sync::Mutex<std::collections::BTreeSet<u64>> =
    std::sync::Mutex::new(std::collections::BTreeSet::new());

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A freshly generated or imported key pair
///
/// Used when creating accounts; the secret is encrypted into the wallet
/// container right away and the pair is dropped.
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?);
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Raw secret bytes, wiped when the returned buffer is dropped
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::from_public_key(&self.public_key, network)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.non_secure_erase();
    }
}

/// Plaintext signing key scoped to a single vault signing call
///
/// Not `Clone`; the vault only lends it out by reference, so it cannot
/// outlive the closure it was handed to.
pub struct SigningKey {
    secret_key: SecretKey,
    public_key: PublicKey,
    scope_id: u64,
}

impl SigningKey {
    pub(crate) fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secret_key,
            public_key,
            scope_id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Identifier of the signing scope this key was decrypted for
    pub fn scope_id(&self) -> u64 {
        self.scope_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::from_public_key(&self.public_key, network)
    }

    /// Sign a message hash
    pub fn sign(&self, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_message(&self.secret_key, message_hash)
    }

    /// ECDH shared secret with another party's public key
    pub fn shared_secret(&self, their_public: &PublicKey) -> Zeroizing<[u8; 32]> {
        let shared = secp256k1::ecdh::SharedSecret::new(their_public, &self.secret_key);
        Zeroizing::new(shared.secret_bytes())
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.secret_key.non_secure_erase();
        #[cfg(test)]
        if let Ok(mut erased) = ERASED_SCOPES.lock() {
            erased.insert(self.scope_id);
        }
    }
}

/// Whether the key decrypted for `scope_id` has been erased
#[cfg(test)]
pub(crate) fn scope_erased(scope_id: u64) -> bool {
    ERASED_SCOPES
        .lock()
        .map(|erased| erased.contains(&scope_id))
        .unwrap_or(false)
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

fn digest32(message_hash: &[u8]) -> Vec<u8> {
    if message_hash.len() == 32 {
        message_hash.to_vec()
    } else {
        sha256(message_hash)
    }
}

/// Sign a message hash with a secret key
pub fn sign_message(secret_key: &SecretKey, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(&digest32(message_hash))?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verify a signature against a public key
pub fn verify_signature(
    public_key: &PublicKey,
    message_hash: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(&digest32(message_hash))?;
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key_hex().len(), 66);
        assert!(!kp.address(Network::Mainnet).as_str().is_empty());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let signing = SigningKey::from_secret_bytes(&*kp.secret_bytes()).unwrap();
        let message_hash = sha256(b"Hello, wallet!");

        let signature = signing.sign(&message_hash).unwrap();
        assert!(verify_signature(&kp.public_key, &message_hash, &signature).unwrap());
        assert!(!verify_signature(&kp.public_key, &sha256(b"other"), &signature).unwrap());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let kp = KeyPair::generate();
        let signing = SigningKey::from_secret_bytes(&*kp.secret_bytes()).unwrap();
        let hash = sha256(b"payload");
        assert_eq!(signing.sign(&hash).unwrap(), signing.sign(&hash).unwrap());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let private_hex = hex::encode(*kp1.secret_bytes());

        let kp2 = KeyPair::from_private_key_hex(&private_hex).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert!(KeyPair::from_private_key_hex("zz").is_err());
    }

    #[test]
    fn test_signing_key_records_erasure() {
        let kp = KeyPair::generate();
        let signing = SigningKey::from_secret_bytes(&*kp.secret_bytes()).unwrap();
        let id = signing.scope_id();
        assert!(!scope_erased(id));
        drop(signing);
        assert!(scope_erased(id));
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let a_key = SigningKey::from_secret_bytes(&*a.secret_bytes()).unwrap();
        let b_key = SigningKey::from_secret_bytes(&*b.secret_bytes()).unwrap();
        assert_eq!(
            *a_key.shared_secret(&b.public_key),
            *b_key.shared_secret(&a.public_key)
        );
    }
}
