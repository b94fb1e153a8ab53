//! Pending multisig transactions
//!
//! An inner transaction built for a multisig account, together with the
//! cosignatures collected for it so far.

use crate::core::Transaction;
use crate::crypto::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One cosignatory's signature on a pending inner transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cosignature {
    pub cosignatory: Address,
    /// Hash of the wrapping multisig signature transaction, when it was
    /// built locally
    pub wrapper_hash: Option<String>,
    pub signed_at: DateTime<Utc>,
}

/// Why a pending transaction was rejected
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// A conflicting transaction won on the network
    Conflicting(String),
    /// The network does not know the multisig account
    UnknownMultisigAccount,
    /// The node refused the cosignature or the inner transaction
    Network(String),
    /// The inner deadline passed before the node included it
    Expired,
}

/// Lifecycle of a pending multisig transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PendingState {
    Unsigned,
    PartiallySigned,
    /// Observed as included by the node
    Confirmed,
    Rejected { reason: RejectReason },
}

impl PendingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PendingState::Confirmed | PendingState::Rejected { .. })
    }
}

/// An inner transaction awaiting cosignatures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingMultisigTransaction {
    /// Hash of the inner transaction; the key of this entry
    pub inner_hash: String,
    pub multisig_account: Address,
    pub inner: Transaction,
    pub cosignatures: Vec<Cosignature>,
    /// Cosignatory count at the time the entry was created
    pub threshold: usize,
    pub state: PendingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingMultisigTransaction {
    pub fn new(inner: Transaction, threshold: usize) -> Self {
        let now = Utc::now();
        Self {
            inner_hash: inner.hash.clone(),
            multisig_account: inner.sender.clone(),
            inner,
            cosignatures: Vec::new(),
            threshold,
            state: PendingState::Unsigned,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn signed_by(&self, cosignatory: &Address) -> bool {
        self.cosignatures.iter().any(|c| &c.cosignatory == cosignatory)
    }

    pub fn signature_count(&self) -> usize {
        self.cosignatures.len()
    }

    /// Every cosignatory has signed locally or on the network
    ///
    /// Informational only; confirmation is taken from the node.
    pub fn nominally_complete(&self) -> bool {
        self.threshold > 0 && self.cosignatures.len() >= self.threshold
    }

    /// Record a cosignature; returns false when it was already present
    pub(crate) fn add_cosignature(
        &mut self,
        cosignatory: Address,
        wrapper_hash: Option<String>,
    ) -> bool {
        if self.signed_by(&cosignatory) {
            return false;
        }
        self.cosignatures.push(Cosignature {
            cosignatory,
            wrapper_hash,
            signed_at: Utc::now(),
        });
        self.state = PendingState::PartiallySigned;
        self.updated_at = Utc::now();
        true
    }

    pub(crate) fn finalize(&mut self, state: PendingState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
