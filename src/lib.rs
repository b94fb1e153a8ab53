//! Wallet Core: custody and transaction client for an account-based chain
//!
//! This crate provides the client side of a wallet featuring:
//! - Password-encrypted wallet containers (Argon2id + ChaCha20-Poly1305)
//! - Scoped signing: plaintext keys only live inside a signing call
//! - Transfers, delegated harvesting and multisig transactions
//! - Minimum fee schedule and field validation
//! - Multisig cosignatory graph with cycle detection
//! - Node status monitoring with readiness gating
//! - Submission tracking until confirmation or expiry
//! - Stable numeric fault codes
//!
//! # Example
//!
//! ```no_run
//! use wallet_core::config::ClientConfig;
//! use wallet_core::service::WalletClient;
//! use wallet_core::vault::AccountSource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WalletClient::new(ClientConfig::default())?;
//!
//! // Create a wallet and an account
//! client.create_wallet("main", "correct horse")?;
//! let account = client.add_account("main", "correct horse", AccountSource::Generate, None)?;
//! println!("Address: {}", account.address);
//! # Ok(())
//! # }
//! ```

pub mod addressbook;
pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod fault;
pub mod multisig;
pub mod network;
pub mod service;
pub mod vault;

// Re-export commonly used types
pub use addressbook::{AddressBook, InMemoryAddressBook};
pub use api::{create_router, ApiState};
pub use config::ClientConfig;
pub use crate::core::{Amount, Transaction, TransactionBuilder};
pub use crypto::{Address, KeyPair, Network};
pub use fault::{Fault, FaultClass, FaultCode, FaultReport};
pub use multisig::MultisigCoordinator;
pub use network::{NodeConnector, NodeSyncMonitor, SubmissionTracker};
pub use service::{ClientError, WalletClient};
pub use vault::{WalletVault, VaultError};
