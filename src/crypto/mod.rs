//! Cryptographic utilities for the wallet
//!
//! This module provides:
//! - SHA-256 hashing
//! - ECDSA key management (secp256k1) with scoped signing keys
//! - Address derivation and validation
//! - Encrypted transfer messages

pub mod address;
pub mod hash;
pub mod keys;
pub mod message;

pub use address::{Address, AddressError, Network};
pub use hash::{double_sha256, sha256, sha256_hex, sha256_parts};
pub use keys::{public_key_from_hex, sign_message, verify_signature, KeyError, KeyPair, SigningKey};
pub use message::{decrypt_message, encrypt_message, sealed_len, MessageCryptoError};
