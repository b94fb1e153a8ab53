//! Submission and confirmation tracking
//!
//! The tracker is the only path from a signed transaction to the node. It
//! gates every submission on policy, readiness and local verification,
//! dispatches accepted transactions from a detached task, and then follows
//! them until the node reports them included or their deadline passes.
//!
//! The pending set is published copy-on-write through a watch channel;
//! individual status transitions go out on a broadcast channel.

use super::connector::{NodeConnector, NodeError, NodeRejection, TransactionStatus};
use super::monitor::{NodeNotReady, NodeSyncMonitor};
use crate::core::Transaction;
use crate::fault::{Fault, FaultCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Buffered status changes per subscriber
const CHANGE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Multisig-originated transactions must be wrapped in a cosignature")]
    MultisigOriginated,
    #[error(transparent)]
    NotReady(#[from] NodeNotReady),
    #[error("Transaction deadline has passed")]
    StaleDeadline,
    #[error("Transaction signature does not verify")]
    InvalidSignature,
    #[error("Transaction {0} is already known to the node")]
    DuplicateHash(String),
    #[error("Node rejected the transaction: {}", .0.reason)]
    NetworkRejected(NodeRejection),
    #[error("Outcome of submitting {hash} is unknown: {source}")]
    OutcomeUnknown { hash: String, source: NodeError },
    #[error("Dispatch task failed: {0}")]
    Dispatch(String),
}

impl Fault for SubmissionError {
    fn code(&self) -> FaultCode {
        match self {
            SubmissionError::MultisigOriginated => FaultCode::MultisigCannotInitiate,
            SubmissionError::NotReady(e) => e.code(),
            SubmissionError::StaleDeadline => FaultCode::StaleDeadline,
            SubmissionError::InvalidSignature => FaultCode::InvalidSignature,
            SubmissionError::DuplicateHash(_) => FaultCode::DuplicateHash,
            SubmissionError::NetworkRejected(rejection) => rejection.code,
            SubmissionError::OutcomeUnknown { .. } => FaultCode::NodeUnavailable,
            SubmissionError::Dispatch(_) => FaultCode::Unexpected,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Where a submitted transaction stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackedStatus {
    Pending,
    Confirmed { confirmations: u64, height: u64 },
    Expired,
    Failed { reason: String },
}

impl TrackedStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TrackedStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTransaction {
    pub hash: String,
    pub transaction: Transaction,
    pub status: TrackedStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the last dispatch may or may not have reached the node
    pub dispatch_uncertain: bool,
}

impl TrackedTransaction {
    fn pending(transaction: Transaction, now: DateTime<Utc>) -> Self {
        Self {
            hash: transaction.hash.clone(),
            transaction,
            status: TrackedStatus::Pending,
            submitted_at: now,
            updated_at: now,
            dispatch_uncertain: false,
        }
    }
}

/// A single status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub hash: String,
    pub previous: TrackedStatus,
    pub current: TrackedStatus,
}

/// Published view of every tracked transaction, oldest first
pub type TrackedSet = Arc<Vec<TrackedTransaction>>;

// =============================================================================
// Tracker
// =============================================================================

struct TrackerState {
    connector: Arc<dyn NodeConnector>,
    entries: Mutex<HashMap<String, TrackedTransaction>>,
    published: watch::Sender<TrackedSet>,
    changes: broadcast::Sender<StatusChange>,
}

impl TrackerState {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackedTransaction>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a fresh copy of the set; called with the entry lock held
    fn publish(&self, entries: &HashMap<String, TrackedTransaction>) {
        let mut set: Vec<_> = entries.values().cloned().collect();
        set.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        self.published.send_replace(Arc::new(set));
    }

    fn set_status(
        &self,
        entries: &mut HashMap<String, TrackedTransaction>,
        hash: &str,
        status: TrackedStatus,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = entries.get_mut(hash) else {
            return false;
        };
        if entry.status == status {
            return false;
        }
        let previous = std::mem::replace(&mut entry.status, status.clone());
        entry.updated_at = now;
        log::info!("Transaction {}: {:?} -> {:?}", hash, previous, status);
        // no subscribers is fine
        let _ = self.changes.send(StatusChange {
            hash: hash.to_string(),
            previous,
            current: status,
        });
        true
    }

    /// Record the node's answer to a dispatch
    fn settle(
        &self,
        hash: &str,
        result: Result<(), NodeError>,
        redispatch: bool,
    ) -> Result<TrackedTransaction, SubmissionError> {
        let mut entries = self.lock();
        let outcome = match result {
            Ok(()) => Ok(()),
            // the earlier uncertain dispatch did arrive
            Err(NodeError::Rejected(rejection)) if rejection.is_duplicate() && redispatch => Ok(()),
            // the node already holds it; keep tracking so it still settles
            Err(NodeError::Rejected(rejection)) if rejection.is_duplicate() => {
                if let Some(entry) = entries.get_mut(hash) {
                    entry.dispatch_uncertain = false;
                    entry.updated_at = Utc::now();
                }
                self.publish(&entries);
                log::warn!("Node already knows {}", hash);
                return Err(SubmissionError::DuplicateHash(hash.to_string()));
            }
            Err(NodeError::Rejected(rejection)) => {
                entries.remove(hash);
                self.publish(&entries);
                log::warn!("Node rejected {}: {}", hash, rejection.reason);
                return Err(SubmissionError::NetworkRejected(rejection));
            }
            Err(e) => Err(e),
        };

        let Some(entry) = entries.get_mut(hash) else {
            return Err(SubmissionError::Dispatch(format!("{} vanished during dispatch", hash)));
        };
        match outcome {
            Ok(()) => {
                entry.dispatch_uncertain = false;
                entry.updated_at = Utc::now();
                let record = entry.clone();
                self.publish(&entries);
                log::info!("Transaction {} accepted by node", hash);
                Ok(record)
            }
            Err(source) => {
                entry.dispatch_uncertain = true;
                entry.updated_at = Utc::now();
                self.publish(&entries);
                log::warn!("Dispatch of {} failed: {}", hash, source);
                Err(SubmissionError::OutcomeUnknown {
                    hash: hash.to_string(),
                    source,
                })
            }
        }
    }
}

/// Gatekeeper between signed transactions and the node
#[derive(Clone)]
pub struct SubmissionTracker {
    state: Arc<TrackerState>,
    monitor: Arc<NodeSyncMonitor>,
}

impl SubmissionTracker {
    pub fn new(connector: Arc<dyn NodeConnector>, monitor: Arc<NodeSyncMonitor>) -> Self {
        let (published, _) = watch::channel(Arc::new(Vec::new()));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(TrackerState {
                connector,
                entries: Mutex::new(HashMap::new()),
                published,
                changes,
            }),
            monitor,
        }
    }

    /// Validate, record and dispatch a signed transaction
    ///
    /// Resubmitting a known hash returns the existing record without
    /// contacting the node, unless the earlier dispatch ended with an
    /// unknown outcome. Dispatch runs in its own task: dropping this future
    /// stops the waiting, not the submission.
    pub async fn submit(&self, tx: Transaction) -> Result<TrackedTransaction, SubmissionError> {
        if tx.multisig_originated {
            return Err(SubmissionError::MultisigOriginated);
        }

        let now = Utc::now();
        let redispatch = {
            let mut entries = self.state.lock();
            let redispatch = match entries.get(&tx.hash) {
                Some(existing) if !existing.dispatch_uncertain => {
                    log::debug!("Transaction {} already tracked", tx.hash);
                    return Ok(existing.clone());
                }
                Some(_) => true,
                None => false,
            };

            self.monitor.readiness()?;
            if tx.is_expired(now) {
                return Err(SubmissionError::StaleDeadline);
            }
            if !matches!(tx.verify(), Ok(true)) {
                return Err(SubmissionError::InvalidSignature);
            }

            if !redispatch {
                entries.insert(tx.hash.clone(), TrackedTransaction::pending(tx.clone(), now));
                self.state.publish(&entries);
            }
            redispatch
        };

        log::info!("Dispatching transaction {}", tx.hash);
        let state = Arc::clone(&self.state);
        let dispatch: JoinHandle<_> = tokio::spawn(async move {
            let result = state.connector.announce(&tx).await;
            state.settle(&tx.hash, result, redispatch)
        });

        dispatch
            .await
            .map_err(|e| SubmissionError::Dispatch(e.to_string()))?
    }

    pub fn get(&self, hash: &str) -> Option<TrackedTransaction> {
        self.state.lock().get(hash).cloned()
    }

    /// Current published set
    pub fn list(&self) -> TrackedSet {
        self.state.published.borrow().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .values()
            .filter(|entry| entry.status.is_pending())
            .count()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackedSet> {
        self.state.published.subscribe()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.state.changes.subscribe()
    }

    /// Drop expired and failed records
    pub fn prune_settled(&self) -> usize {
        let mut entries = self.state.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            matches!(
                entry.status,
                TrackedStatus::Pending | TrackedStatus::Confirmed { .. }
            )
        });
        let removed = before - entries.len();
        if removed > 0 {
            self.state.publish(&entries);
        }
        removed
    }

    /// Classify pending records against the node
    ///
    /// Does nothing unless the node is synchronized. Returns the number of
    /// records whose status changed.
    pub async fn reconcile_once(&self) -> Result<usize, NodeError> {
        let snapshot = self.monitor.snapshot();
        if !snapshot.ready_for_transactions() {
            return Ok(0);
        }
        let chain_height = match snapshot.height {
            Some(height) => height,
            None => self.state.connector.chain_height().await?,
        };

        let pending: Vec<(String, DateTime<Utc>)> = self
            .state
            .lock()
            .values()
            .filter(|entry| entry.status.is_pending())
            .map(|entry| (entry.hash.clone(), entry.transaction.deadline))
            .collect();

        let mut updates = Vec::new();
        for (hash, deadline) in pending {
            let status = match self.state.connector.transaction_status(&hash).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("Status query for {} failed: {}", hash, e);
                    continue;
                }
            };
            let now = Utc::now();
            let next = match status {
                TransactionStatus::Included { height } => TrackedStatus::Confirmed {
                    confirmations: chain_height.saturating_sub(height) + 1,
                    height,
                },
                TransactionStatus::Rejected { reason } => TrackedStatus::Failed { reason },
                TransactionStatus::Unknown | TransactionStatus::Unconfirmed { .. }
                    if deadline <= now =>
                {
                    TrackedStatus::Expired
                }
                _ => continue,
            };
            updates.push((hash, next));
        }

        let now = Utc::now();
        let mut entries = self.state.lock();
        let mut changed = 0;
        for (hash, next) in updates {
            let still_pending = entries
                .get(&hash)
                .map(|entry| entry.status.is_pending())
                .unwrap_or(false);
            if still_pending {
                if let Some(entry) = entries.get_mut(&hash) {
                    entry.dispatch_uncertain = false;
                }
                if self.state.set_status(&mut entries, &hash, next, now) {
                    changed += 1;
                }
            }
        }

        // confirmations keep counting as the chain grows
        let confirmed: Vec<(String, TrackedStatus)> = entries
            .values()
            .filter_map(|entry| match entry.status {
                TrackedStatus::Confirmed { height, .. } => Some((
                    entry.hash.clone(),
                    TrackedStatus::Confirmed {
                        confirmations: chain_height.saturating_sub(height) + 1,
                        height,
                    },
                )),
                _ => None,
            })
            .collect();
        for (hash, next) in confirmed {
            if self.state.set_status(&mut entries, &hash, next, now) {
                changed += 1;
            }
        }

        if changed > 0 {
            self.state.publish(&entries);
            log::debug!("Reconciliation updated {} transaction(s)", changed);
        }
        Ok(changed)
    }

    /// Reconcile on every published node snapshot until `cancel` fires
    pub async fn run_reconciliation(self, cancel: CancellationToken) {
        let mut snapshots = self.monitor.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Err(e) = self.reconcile_once().await {
                        log::warn!("Reconciliation failed: {}", e);
                    }
                }
            }
        }
        log::info!("Submission reconciliation stopped");
    }

    pub fn spawn_reconciliation(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_reconciliation(cancel))
    }
}
