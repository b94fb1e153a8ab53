//! Encrypted transfer messages
//!
//! The sender derives a shared key from ECDH between its signing key and the
//! recipient's public key; the payload is sealed with ChaCha20-Poly1305.
//! Wire layout is `nonce (12 bytes) || ciphertext`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use secp256k1::PublicKey;
use thiserror::Error;

use super::hash::sha256;
use super::keys::SigningKey;

pub const MESSAGE_NONCE_LEN: usize = 12;

/// Poly1305 tag length appended by the cipher
pub const MESSAGE_TAG_LEN: usize = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageCryptoError {
    #[error("Message encryption failed")]
    EncryptionFailed,
    #[error("Message could not be decrypted")]
    DecryptionFailed,
}

fn message_cipher(local: &SigningKey, remote: &PublicKey) -> ChaCha20Poly1305 {
    let shared = local.shared_secret(remote);
    let key = sha256(&*shared);
    ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key))
}

/// Encrypt `plaintext` for `recipient`
pub fn encrypt_message(
    sender: &SigningKey,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, MessageCryptoError> {
    let mut nonce_bytes = [0u8; MESSAGE_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = message_cipher(sender, recipient)
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| MessageCryptoError::EncryptionFailed)?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed message sent between `local` and `remote`
pub fn decrypt_message(
    local: &SigningKey,
    remote: &PublicKey,
    sealed: &[u8],
) -> Result<Vec<u8>, MessageCryptoError> {
    if sealed.len() < MESSAGE_NONCE_LEN + MESSAGE_TAG_LEN {
        return Err(MessageCryptoError::DecryptionFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(MESSAGE_NONCE_LEN);
    message_cipher(local, remote)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| MessageCryptoError::DecryptionFailed)
}

/// Size on the wire of an encrypted message with `plaintext_len` bytes
pub fn sealed_len(plaintext_len: usize) -> usize {
    MESSAGE_NONCE_LEN + plaintext_len + MESSAGE_TAG_LEN
}
