//! Encrypted wallet storage
//!
//! - Password-based key derivation and sealing
//! - Wallet containers on disk
//! - The vault with scoped signing-key access

pub mod cipher;
pub mod container;
#[allow(clippy::module_inception)]
pub mod vault;

pub use cipher::{CipherError, KdfParams};
pub use container::{AccountSnapshot, WalletStore, CONTAINER_EXTENSION};
pub use vault::{
    AccountSource, AccountSummary, DecryptedHandle, RemovalBlock, VaultConfig, VaultError,
    WalletSummary, WalletVault,
};
