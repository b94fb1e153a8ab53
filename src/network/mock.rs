//! Scripted in-memory node for tests

use super::connector::{
    AccountInfo, NodeConnector, NodeError, RawNodeStatus, TransactionStatus,
};
use crate::core::Transaction;
use crate::crypto::Address;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Node whose answers are queued up front
///
/// Status answers are consumed in order; the last one repeats once the
/// queue runs dry.
pub struct MockNode {
    statuses: Mutex<VecDeque<Result<RawNodeStatus, NodeError>>>,
    last_status: Mutex<Result<RawNodeStatus, NodeError>>,
    announce_results: Mutex<VecDeque<Result<(), NodeError>>>,
    announced: Mutex<Vec<Transaction>>,
    tx_statuses: Mutex<HashMap<String, Result<TransactionStatus, NodeError>>>,
    accounts: Mutex<HashMap<Address, AccountInfo>>,
    height: AtomicU64,
    announce_delay: Mutex<Option<Duration>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(Err(NodeError::Unreachable("not scripted".into()))),
            announce_results: Mutex::new(VecDeque::new()),
            announced: Mutex::new(Vec::new()),
            tx_statuses: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            height: AtomicU64::new(0),
            announce_delay: Mutex::new(None),
        }
    }
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(code: u8, height: Option<u64>, peer_height: Option<u64>) -> RawNodeStatus {
        RawNodeStatus {
            code,
            height,
            peer_height,
        }
    }

    /// A synchronized node at `height`
    pub fn synchronized(height: u64) -> Self {
        let node = Self::new();
        node.push_status(Ok(Self::status(5, Some(height), None)));
        node.set_height(height);
        node
    }

    pub fn push_status(&self, status: Result<RawNodeStatus, NodeError>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn push_announce(&self, result: Result<(), NodeError>) {
        self.announce_results.lock().unwrap().push_back(result);
    }

    pub fn set_announce_delay(&self, delay: Duration) {
        *self.announce_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_tx_status(&self, hash: &str, status: TransactionStatus) {
        self.tx_statuses
            .lock()
            .unwrap()
            .insert(hash.to_string(), Ok(status));
    }

    /// Make status queries for `hash` fail with `error`
    pub fn fail_tx_status(&self, hash: &str, error: NodeError) {
        self.tx_statuses
            .lock()
            .unwrap()
            .insert(hash.to_string(), Err(error));
    }

    pub fn set_account(&self, info: AccountInfo) {
        self.accounts
            .lock()
            .unwrap()
            .insert(info.address.clone(), info);
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn announced(&self) -> Vec<Transaction> {
        self.announced.lock().unwrap().clone()
    }
}

impl NodeConnector for MockNode {
    fn node_status(&self) -> BoxFuture<'_, Result<RawNodeStatus, NodeError>> {
        Box::pin(async move {
            let next = self.statuses.lock().unwrap().pop_front();
            let mut last = self.last_status.lock().unwrap();
            if let Some(next) = next {
                *last = next;
            }
            last.clone()
        })
    }

    fn chain_height(&self) -> BoxFuture<'_, Result<u64, NodeError>> {
        Box::pin(async move { Ok(self.height.load(Ordering::SeqCst)) })
    }

    fn account_info<'a>(
        &'a self,
        address: &'a Address,
    ) -> BoxFuture<'a, Result<AccountInfo, NodeError>> {
        Box::pin(async move {
            self.accounts
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .ok_or(NodeError::Http(404))
        })
    }

    fn announce<'a>(&'a self, tx: &'a Transaction) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async move {
            let delay = *self.announce_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.announced.lock().unwrap().push(tx.clone());
            self.announce_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        })
    }

    fn transaction_status<'a>(
        &'a self,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<TransactionStatus, NodeError>> {
        Box::pin(async move {
            self.tx_statuses
                .lock()
                .unwrap()
                .get(hash)
                .cloned()
                .unwrap_or(Ok(TransactionStatus::Unknown))
        })
    }
}
