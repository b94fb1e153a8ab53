//! Multisig coordinator
//!
//! Keeps the cosignatory graph of known multisig accounts and the pending
//! inner transactions awaiting cosignatures. Completion is only ever taken
//! from node observations.

use super::graph::{CosignatoryGraph, MultisigError};
use super::transaction::{PendingMultisigTransaction, PendingState, RejectReason};
use crate::core::{Transaction, TransactionKind};
use crate::crypto::Address;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A registered multisig account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigAccount {
    pub address: Address,
    /// Hex public key used as signer of inner transactions
    pub public_key: String,
    pub cosignatories: BTreeSet<Address>,
}

/// What the node reports about a pending inner transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultisigObservation {
    /// Not seen by the node
    Unknown,
    /// Seen unconfirmed, with the cosignatories that signed so far
    Unconfirmed { cosignatories: Vec<Address> },
    Included,
    Rejected(RejectReason),
}

/// Coordinator for multisig accounts and pending transactions
#[derive(Debug, Default)]
pub struct MultisigCoordinator {
    graph: CosignatoryGraph,
    public_keys: HashMap<Address, String>,
    pending: HashMap<String, PendingMultisigTransaction>,
}

impl MultisigCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Record a multisig account as known to the network
    pub fn register_account(
        &mut self,
        address: Address,
        public_key: String,
        cosignatories: impl IntoIterator<Item = Address>,
    ) {
        debug!("Registered multisig account {}", address);
        self.public_keys.insert(address.clone(), public_key);
        self.graph.insert(address, cosignatories);
    }

    /// Register the account converted by a confirmed conversion
    pub fn apply_conversion(&mut self, conversion: &Transaction) -> Result<(), MultisigError> {
        let TransactionKind::MultisigConversion { cosignatories } = &conversion.kind else {
            return Err(MultisigError::NotACosignature);
        };
        info!(
            "Account {} converted to multisig with {} cosignatories",
            conversion.sender,
            cosignatories.len()
        );
        self.register_account(
            conversion.sender.clone(),
            conversion.signer_public_key.clone(),
            cosignatories.iter().cloned(),
        );
        Ok(())
    }

    pub fn graph(&self) -> &CosignatoryGraph {
        &self.graph
    }

    pub fn is_multisig(&self, address: &Address) -> bool {
        self.graph.is_multisig(address)
    }

    pub fn account(&self, address: &Address) -> Option<MultisigAccount> {
        let cosignatories = self.graph.cosignatories(address)?;
        Some(MultisigAccount {
            address: address.clone(),
            public_key: self.public_keys.get(address).cloned().unwrap_or_default(),
            cosignatories: cosignatories.clone(),
        })
    }

    pub fn validate_conversion(
        &self,
        account: &Address,
        cosignatories: &[Address],
    ) -> Result<(), MultisigError> {
        self.graph.check_conversion(account, cosignatories)
    }

    /// Fail unless `signer` is currently a cosignatory of `account`
    pub fn authorize(&self, account: &Address, signer: &Address) -> Result<(), MultisigError> {
        if !self.graph.is_multisig(account) {
            return Err(MultisigError::UnknownMultisigAccount(account.clone()));
        }
        if !self.graph.is_cosignatory(account, signer) {
            return Err(MultisigError::NotACosignatory {
                signer: signer.clone(),
                account: account.clone(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Pending transactions
    // =========================================================================

    /// Track an inner transaction before anyone has signed it
    pub fn propose(&mut self, inner: Transaction) -> Result<&PendingMultisigTransaction, MultisigError> {
        if !inner.multisig_originated {
            return Err(MultisigError::NotMultisigOriginated);
        }
        let threshold = self
            .graph
            .cosignatories(&inner.sender)
            .ok_or_else(|| MultisigError::UnknownMultisigAccount(inner.sender.clone()))?
            .len();

        let hash = inner.hash.clone();
        Ok(self
            .pending
            .entry(hash)
            .or_insert_with(|| PendingMultisigTransaction::new(inner, threshold)))
    }

    /// Check that `wrapper` could be recorded, without changing anything
    pub fn check_cosignature(&self, wrapper: &Transaction) -> Result<(), MultisigError> {
        let TransactionKind::MultisigSignature {
            multisig_account,
            inner,
        } = &wrapper.kind
        else {
            return Err(MultisigError::NotACosignature);
        };
        if !wrapper.is_signed() {
            return Err(MultisigError::NotACosignature);
        }
        if !inner.multisig_originated {
            return Err(MultisigError::NotMultisigOriginated);
        }
        self.authorize(multisig_account, &wrapper.sender)
            .inspect_err(|e| warn!("Rejected cosignature: {}", e))?;

        match self.pending.get(&inner.hash) {
            Some(existing) if existing.state.is_terminal() => {
                Err(MultisigError::Finalized(inner.hash.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Record a cosignature the node has accepted
    ///
    /// Creates the pending entry when the inner transaction is not yet known.
    /// A signer outside the current cosignatory set is rejected and nothing
    /// changes.
    pub fn record_cosignature(
        &mut self,
        wrapper: &Transaction,
    ) -> Result<&PendingMultisigTransaction, MultisigError> {
        self.check_cosignature(wrapper)?;
        let TransactionKind::MultisigSignature { inner, .. } = &wrapper.kind else {
            return Err(MultisigError::NotACosignature);
        };

        self.propose(inner.as_ref().clone())?;
        let entry = self
            .pending
            .get_mut(&inner.hash)
            .ok_or_else(|| MultisigError::UnknownTransaction(inner.hash.clone()))?;
        if entry.add_cosignature(wrapper.sender.clone(), Some(wrapper.hash.clone())) {
            info!(
                "Cosignature {}/{} by {} on {}",
                entry.signature_count(),
                entry.threshold,
                wrapper.sender,
                entry.inner_hash
            );
        }
        Ok(entry)
    }

    /// Reject open entries whose inner deadline has passed
    ///
    /// Only entries listed in `unresolved` are considered; those are the ones
    /// the node reported as unknown or still unconfirmed.
    pub fn expire_overdue(&mut self, unresolved: &[String], now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for hash in unresolved {
            let Some(entry) = self.pending.get_mut(hash) else {
                continue;
            };
            if entry.state.is_terminal() || !entry.inner.is_expired(now) {
                continue;
            }
            info!("Multisig transaction {} expired", hash);
            entry.finalize(PendingState::Rejected {
                reason: RejectReason::Expired,
            });
            expired.push(hash.clone());
        }
        expired
    }

    /// Apply what the node reports about a pending inner transaction
    pub fn observe(
        &mut self,
        inner_hash: &str,
        observation: MultisigObservation,
    ) -> Result<&PendingMultisigTransaction, MultisigError> {
        let entry = self
            .pending
            .get_mut(inner_hash)
            .ok_or_else(|| MultisigError::UnknownTransaction(inner_hash.to_string()))?;
        if entry.state.is_terminal() {
            return Ok(entry);
        }

        match observation {
            MultisigObservation::Unknown => {}
            MultisigObservation::Unconfirmed { cosignatories } => {
                let current = self.graph.cosignatories(&entry.multisig_account);
                for cosignatory in cosignatories {
                    if current.is_some_and(|set| set.contains(&cosignatory)) {
                        entry.add_cosignature(cosignatory, None);
                    } else {
                        warn!(
                            "Node reported non-cosignatory {} on {}",
                            cosignatory, inner_hash
                        );
                    }
                }
            }
            MultisigObservation::Included => {
                info!("Multisig transaction {} confirmed", inner_hash);
                entry.finalize(PendingState::Confirmed);
            }
            MultisigObservation::Rejected(reason) => {
                info!("Multisig transaction {} rejected: {:?}", inner_hash, reason);
                entry.finalize(PendingState::Rejected { reason });
            }
        }
        Ok(entry)
    }

    /// Reject a pending entry locally
    pub fn reject(&mut self, inner_hash: &str, reason: RejectReason) -> Result<(), MultisigError> {
        let entry = self
            .pending
            .get_mut(inner_hash)
            .ok_or_else(|| MultisigError::UnknownTransaction(inner_hash.to_string()))?;
        if entry.state.is_terminal() {
            return Err(MultisigError::Finalized(inner_hash.to_string()));
        }
        entry.finalize(PendingState::Rejected { reason });
        Ok(())
    }

    pub fn get(&self, inner_hash: &str) -> Result<&PendingMultisigTransaction, MultisigError> {
        self.pending
            .get(inner_hash)
            .ok_or_else(|| MultisigError::UnknownTransaction(inner_hash.to_string()))
    }

    /// Pending entries, oldest first
    pub fn list_pending(&self) -> Vec<&PendingMultisigTransaction> {
        let mut entries: Vec<_> = self.pending.values().collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Non-terminal entries `cosignatory` may still sign
    pub fn awaiting(&self, cosignatory: &Address) -> Vec<&PendingMultisigTransaction> {
        self.list_pending()
            .into_iter()
            .filter(|e| !e.state.is_terminal())
            .filter(|e| self.graph.is_cosignatory(&e.multisig_account, cosignatory))
            .filter(|e| !e.signed_by(cosignatory))
            .collect()
    }

    /// Hashes of non-terminal entries
    pub fn open_hashes(&self) -> Vec<String> {
        self.pending
            .values()
            .filter(|e| !e.state.is_terminal())
            .map(|e| e.inner_hash.clone())
            .collect()
    }

    /// Drop confirmed and rejected entries
    pub fn prune_finalized(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, e| !e.state.is_terminal());
        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, Transaction, TransactionKind};
    use crate::crypto::{KeyPair, Network, SigningKey};
    use crate::fault::Fault;
    use chrono::Duration;

    struct Party {
        key: KeyPair,
        address: Address,
    }

    fn party() -> Party {
        let key = KeyPair::generate();
        let address = key.address(Network::Testnet);
        Party { key, address }
    }

    fn inner_transfer(m: &Party) -> Transaction {
        let now = Utc::now();
        Transaction::unsigned(
            Network::Testnet,
            TransactionKind::Transfer {
                recipient: party().address,
                amount: Amount::from_coins(1),
                message: None,
            },
            m.key.public_key_hex(),
            m.address.clone(),
            Amount::from_coins(9),
            now,
            now + Duration::hours(1),
            true,
        )
        .unwrap()
    }

    fn cosign(signer: &Party, m: &Party, inner: &Transaction) -> Transaction {
        let now = Utc::now();
        let mut wrapper = Transaction::unsigned(
            Network::Testnet,
            TransactionKind::MultisigSignature {
                multisig_account: m.address.clone(),
                inner: Box::new(inner.clone()),
            },
            signer.key.public_key_hex(),
            signer.address.clone(),
            Amount::from_coins(6),
            now,
            now + Duration::hours(1),
            false,
        )
        .unwrap();
        let key = SigningKey::from_secret_bytes(&*signer.key.secret_bytes()).unwrap();
        let signature = key.sign(&wrapper.signing_hash().unwrap()).unwrap();
        wrapper.attach_signature(&signature).unwrap();
        wrapper
    }

    fn setup() -> (MultisigCoordinator, Party, Party, Party) {
        let (m, x, y) = (party(), party(), party());
        let mut coordinator = MultisigCoordinator::new();
        coordinator.register_account(
            m.address.clone(),
            m.key.public_key_hex(),
            [x.address.clone(), y.address.clone()],
        );
        (coordinator, m, x, y)
    }

    #[test]
    fn test_signing_lifecycle() {
        let (mut coordinator, m, x, y) = setup();
        let inner = inner_transfer(&m);

        let entry = coordinator.propose(inner.clone()).unwrap();
        assert_eq!(entry.state, PendingState::Unsigned);
        assert_eq!(entry.threshold, 2);

        let entry = coordinator.record_cosignature(&cosign(&x, &m, &inner)).unwrap();
        assert_eq!(entry.state, PendingState::PartiallySigned);
        assert!(!entry.nominally_complete());

        let entry = coordinator.record_cosignature(&cosign(&y, &m, &inner)).unwrap();
        assert!(entry.nominally_complete());
        // still not confirmed until the node says so
        assert_eq!(entry.state, PendingState::PartiallySigned);

        let entry = coordinator
            .observe(&inner.hash, MultisigObservation::Included)
            .unwrap();
        assert_eq!(entry.state, PendingState::Confirmed);
        assert_eq!(coordinator.prune_finalized(), 1);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn test_non_cosignatory_rejected_without_change() {
        let (mut coordinator, m, x, _y) = setup();
        let stranger = party();
        let inner = inner_transfer(&m);
        coordinator.record_cosignature(&cosign(&x, &m, &inner)).unwrap();

        let err = coordinator
            .record_cosignature(&cosign(&stranger, &m, &inner))
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 741);

        let entry = coordinator.get(&inner.hash).unwrap();
        assert_eq!(entry.signature_count(), 1);
        assert!(entry.signed_by(&x.address));
        assert_eq!(entry.state, PendingState::PartiallySigned);
    }

    #[test]
    fn test_repeated_cosignature_is_idempotent() {
        let (mut coordinator, m, x, _y) = setup();
        let inner = inner_transfer(&m);
        coordinator.record_cosignature(&cosign(&x, &m, &inner)).unwrap();
        let entry = coordinator.record_cosignature(&cosign(&x, &m, &inner)).unwrap();
        assert_eq!(entry.signature_count(), 1);
    }

    #[test]
    fn test_finalized_entries_refuse_signatures() {
        let (mut coordinator, m, x, y) = setup();
        let inner = inner_transfer(&m);
        coordinator.record_cosignature(&cosign(&x, &m, &inner)).unwrap();
        coordinator
            .reject(&inner.hash, RejectReason::Conflicting("double spend".into()))
            .unwrap();

        let err = coordinator
            .record_cosignature(&cosign(&y, &m, &inner))
            .unwrap_err();
        assert_eq!(err, MultisigError::Finalized(inner.hash.clone()));
        assert!(coordinator.reject(&inner.hash, RejectReason::UnknownMultisigAccount).is_err());
    }

    #[test]
    fn test_check_cosignature_changes_nothing() {
        let (coordinator, m, x, _y) = setup();
        let stranger = party();
        let inner = inner_transfer(&m);

        assert!(coordinator.check_cosignature(&cosign(&x, &m, &inner)).is_ok());
        assert_eq!(
            coordinator
                .check_cosignature(&cosign(&stranger, &m, &inner))
                .unwrap_err()
                .code()
                .as_u16(),
            741
        );
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn test_overdue_entries_expire() {
        let (mut coordinator, m, x, _y) = setup();
        let inner = inner_transfer(&m);
        let confirmed = inner_transfer(&m);
        coordinator.record_cosignature(&cosign(&x, &m, &inner)).unwrap();
        coordinator.record_cosignature(&cosign(&x, &m, &confirmed)).unwrap();
        coordinator
            .observe(&confirmed.hash, MultisigObservation::Included)
            .unwrap();

        let unresolved = vec![inner.hash.clone(), confirmed.hash.clone()];
        assert!(coordinator.expire_overdue(&unresolved, Utc::now()).is_empty());

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(
            coordinator.expire_overdue(&unresolved, later),
            vec![inner.hash.clone()]
        );
        assert_eq!(
            coordinator.get(&inner.hash).unwrap().state,
            PendingState::Rejected {
                reason: RejectReason::Expired
            }
        );
        assert_eq!(coordinator.get(&confirmed.hash).unwrap().state, PendingState::Confirmed);
        assert!(coordinator.open_hashes().is_empty());
        assert_eq!(coordinator.prune_finalized(), 2);
    }

    #[test]
    fn test_observed_cosigners_merge() {
        let (mut coordinator, m, x, y) = setup();
        let stranger = party();
        let inner = inner_transfer(&m);
        coordinator.propose(inner.clone()).unwrap();

        let entry = coordinator
            .observe(
                &inner.hash,
                MultisigObservation::Unconfirmed {
                    cosignatories: vec![y.address.clone(), stranger.address.clone()],
                },
            )
            .unwrap();
        assert_eq!(entry.signature_count(), 1);
        assert!(entry.signed_by(&y.address));

        assert_eq!(coordinator.awaiting(&x.address).len(), 1);
        assert!(coordinator.awaiting(&y.address).is_empty());
    }

    #[test]
    fn test_unknown_transaction() {
        let (mut coordinator, _m, _x, _y) = setup();
        assert_eq!(
            coordinator
                .observe("deadbeef", MultisigObservation::Included)
                .unwrap_err()
                .code()
                .as_u16(),
            742
        );
    }

    #[test]
    fn test_apply_conversion_registers_account() {
        let mut coordinator = MultisigCoordinator::new();
        let (m, x) = (party(), party());
        let now = Utc::now();
        let conversion = Transaction::unsigned(
            Network::Testnet,
            TransactionKind::MultisigConversion {
                cosignatories: vec![x.address.clone()],
            },
            m.key.public_key_hex(),
            m.address.clone(),
            Amount::from_coins(48),
            now,
            now + Duration::hours(1),
            false,
        )
        .unwrap();

        coordinator.apply_conversion(&conversion).unwrap();
        let account = coordinator.account(&m.address).unwrap();
        assert_eq!(account.public_key, m.key.public_key_hex());
        assert!(coordinator.authorize(&m.address, &x.address).is_ok());
    }
}
