//! Cosignatory relation graph
//!
//! Directed edges run from a multisig account to each of its cosignatories.
//! Conversions are checked against the graph before they are built, so a
//! cycle can never be introduced.

use crate::crypto::Address;
use crate::fault::{Fault, FaultCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

/// Multisig errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultisigError {
    #[error("A multisig conversion needs at least one cosignatory")]
    NoCosignatories,
    #[error("Account {0} cannot be its own cosignatory")]
    SelfReferential(Address),
    #[error("Account {0} is already a multisig account")]
    AlreadyMultisig(Address),
    #[error("Cosignatory {0} is listed more than once")]
    DuplicateCosignatory(Address),
    #[error("Adding {cosignatory} as cosignatory of {account} would create a cycle")]
    Cycle {
        account: Address,
        cosignatory: Address,
    },
    #[error("Account {0} is not a known multisig account")]
    UnknownMultisigAccount(Address),
    #[error("Account {signer} is not a cosignatory of {account}")]
    NotACosignatory { signer: Address, account: Address },
    #[error("Pending multisig transaction {0} is unknown")]
    UnknownTransaction(String),
    #[error("Pending multisig transaction {0} is already finalized")]
    Finalized(String),
    #[error("Transaction is not a signed multisig signature")]
    NotACosignature,
    #[error("Transaction was not built for a multisig account")]
    NotMultisigOriginated,
}

impl Fault for MultisigError {
    fn code(&self) -> FaultCode {
        match self {
            MultisigError::NoCosignatories
            | MultisigError::NotACosignature
            | MultisigError::NotMultisigOriginated => FaultCode::InvalidParameter,
            MultisigError::SelfReferential(_) => FaultCode::SelfReferentialMultisig,
            MultisigError::AlreadyMultisig(_) => FaultCode::MultisigCannotInitiate,
            MultisigError::DuplicateCosignatory(_) => FaultCode::AlreadyCosignatory,
            MultisigError::Cycle { .. } => FaultCode::CosignatoryCycle,
            MultisigError::UnknownMultisigAccount(_) => FaultCode::UnknownAccount,
            MultisigError::NotACosignatory { .. } => FaultCode::NotACosignatory,
            MultisigError::UnknownTransaction(_) => FaultCode::MultisigTransactionUnknown,
            MultisigError::Finalized(_) => FaultCode::MultisigFinalized,
        }
    }
}

/// Multisig account → cosignatory set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignatoryGraph {
    edges: BTreeMap<Address, BTreeSet<Address>>,
}

impl CosignatoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_multisig(&self, account: &Address) -> bool {
        self.edges.contains_key(account)
    }

    pub fn cosignatories(&self, account: &Address) -> Option<&BTreeSet<Address>> {
        self.edges.get(account)
    }

    pub fn is_cosignatory(&self, account: &Address, signer: &Address) -> bool {
        self.edges
            .get(account)
            .is_some_and(|cosignatories| cosignatories.contains(signer))
    }

    /// Multisig accounts `cosignatory` may sign for
    pub fn multisig_accounts_of(&self, cosignatory: &Address) -> Vec<&Address> {
        self.edges
            .iter()
            .filter(|(_, cosignatories)| cosignatories.contains(cosignatory))
            .map(|(account, _)| account)
            .collect()
    }

    /// Whether following edges from `from` reaches `to`
    pub fn reaches(&self, from: &Address, to: &Address) -> bool {
        let mut queue = VecDeque::from([from]);
        let mut visited = BTreeSet::new();

        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(current) {
                queue.extend(next.iter());
            }
        }
        false
    }

    /// Check that converting `account` with `cosignatories` is allowed
    pub fn check_conversion(
        &self,
        account: &Address,
        cosignatories: &[Address],
    ) -> Result<(), MultisigError> {
        if cosignatories.is_empty() {
            return Err(MultisigError::NoCosignatories);
        }
        if cosignatories.contains(account) {
            return Err(MultisigError::SelfReferential(account.clone()));
        }
        if self.is_multisig(account) {
            return Err(MultisigError::AlreadyMultisig(account.clone()));
        }

        let mut seen = BTreeSet::new();
        for cosignatory in cosignatories {
            if !seen.insert(cosignatory) {
                return Err(MultisigError::DuplicateCosignatory(cosignatory.clone()));
            }
            if self.reaches(cosignatory, account) {
                return Err(MultisigError::Cycle {
                    account: account.clone(),
                    cosignatory: cosignatory.clone(),
                });
            }
        }
        Ok(())
    }

    /// Record a confirmed conversion
    pub fn insert(&mut self, account: Address, cosignatories: impl IntoIterator<Item = Address>) {
        self.edges.insert(account, cosignatories.into_iter().collect());
    }

    pub fn remove(&mut self, account: &Address) -> Option<BTreeSet<Address>> {
        self.edges.remove(account)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Network};

    fn addr() -> Address {
        KeyPair::generate().address(Network::Testnet)
    }

    #[test]
    fn test_self_inclusion_rejected() {
        let graph = CosignatoryGraph::new();
        let m = addr();
        let err = graph.check_conversion(&m, &[addr(), m.clone()]).unwrap_err();
        assert_eq!(err, MultisigError::SelfReferential(m));
        assert_eq!(err.code().as_u16(), 744);
    }

    #[test]
    fn test_existing_multisig_cannot_convert_again() {
        let mut graph = CosignatoryGraph::new();
        let (m, x) = (addr(), addr());
        graph.insert(m.clone(), [x]);
        assert!(matches!(
            graph.check_conversion(&m, &[addr()]),
            Err(MultisigError::AlreadyMultisig(_))
        ));
    }

    #[test]
    fn test_duplicates_rejected() {
        let graph = CosignatoryGraph::new();
        let (m, x) = (addr(), addr());
        assert!(matches!(
            graph.check_conversion(&m, &[x.clone(), x]),
            Err(MultisigError::DuplicateCosignatory(_))
        ));
        assert_eq!(
            graph.check_conversion(&m, &[]),
            Err(MultisigError::NoCosignatories)
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = CosignatoryGraph::new();
        let (a, b, c) = (addr(), addr(), addr());
        // b is multisig with cosignatory a; c is multisig with cosignatory b
        graph.insert(b.clone(), [a.clone()]);
        graph.insert(c.clone(), [b.clone()]);

        assert!(graph.reaches(&c, &a));
        assert!(matches!(
            graph.check_conversion(&a, &[c.clone()]),
            Err(MultisigError::Cycle { .. })
        ));
        assert!(graph.check_conversion(&a, &[addr()]).is_ok());
    }

    #[test]
    fn test_membership_queries() {
        let mut graph = CosignatoryGraph::new();
        let (m, x, y) = (addr(), addr(), addr());
        graph.insert(m.clone(), [x.clone(), y.clone()]);

        assert!(graph.is_multisig(&m));
        assert!(graph.is_cosignatory(&m, &x));
        assert!(!graph.is_cosignatory(&m, &m));
        assert_eq!(graph.multisig_accounts_of(&y), vec![&m]);
        assert_eq!(graph.cosignatories(&m).unwrap().len(), 2);
    }
}
