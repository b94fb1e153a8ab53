//! Multi-signature account support
//!
//! A multisig account's transactions only reach the network wrapped in a
//! cosignature from one of its cosignatories. This module tracks which
//! accounts are multisig, who may sign for them, and the inner transactions
//! still collecting signatures.
//!
//! # Example
//!
//! ```ignore
//! let mut coordinator = MultisigCoordinator::new();
//! coordinator.register_account(m, m_public_key, [x, y]);
//!
//! // inner transaction built for m, wrapped and signed by x
//! coordinator.record_cosignature(&wrapper_from_x)?;
//!
//! // only the node decides when it is done
//! coordinator.observe(&inner_hash, MultisigObservation::Included)?;
//! ```

pub mod coordinator;
pub mod graph;
pub mod transaction;

pub use coordinator::{MultisigAccount, MultisigCoordinator, MultisigObservation};
pub use graph::{CosignatoryGraph, MultisigError};
pub use transaction::{Cosignature, PendingMultisigTransaction, PendingState, RejectReason};
