//! Node sync monitor
//!
//! Polls the node's status endpoint on a fixed interval, normalizes the raw
//! status codes into a [`NodePhase`] and publishes every result as a
//! [`NodeStatusSnapshot`] over a watch channel. Consumers never query the
//! node themselves; they read or subscribe to the latest snapshot.

use super::connector::{NodeConnector, NodeError, RawNodeStatus, DEFAULT_REQUEST_TIMEOUT};
use crate::fault::{Fault, FaultCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive failures before the node is reported unavailable
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

// =============================================================================
// Phases
// =============================================================================

/// Normalized node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum NodePhase {
    #[default]
    Unavailable,
    Booting,
    LoadingBlocks { height: u64 },
    Synchronizing { height: u64, lag: u64 },
    Synchronized,
}

impl NodePhase {
    /// Normalize a raw status report
    pub fn from_raw(raw: &RawNodeStatus) -> Self {
        let height = raw.height.unwrap_or(0);
        match raw.code {
            2 | 3 => NodePhase::Booting,
            4 => NodePhase::Synchronizing {
                height,
                lag: raw.peer_height.unwrap_or(height).saturating_sub(height),
            },
            5 => NodePhase::Synchronized,
            7 => NodePhase::LoadingBlocks { height },
            // 0 unknown, 1 stopped, 6 no remote node
            _ => NodePhase::Unavailable,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self, NodePhase::Synchronized)
    }
}

/// Why the node cannot take transactions right now
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeNotReady {
    #[error("Node is unavailable")]
    Unavailable,
    #[error("Node has not booted")]
    NotBooted,
    #[error("Node is loading blocks (height {height})")]
    Loading { height: u64 },
    #[error("Node is synchronizing (height {height}, {lag} blocks behind)")]
    Synchronizing { height: u64, lag: u64 },
}

impl Fault for NodeNotReady {
    fn code(&self) -> FaultCode {
        match self {
            NodeNotReady::Unavailable => FaultCode::NodeUnavailable,
            NodeNotReady::NotBooted => FaultCode::NodeNotBooted,
            NodeNotReady::Loading { .. } => FaultCode::NodeLoading,
            NodeNotReady::Synchronizing { .. } => FaultCode::NodeSynchronizing,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Published result of the latest poll
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeStatusSnapshot {
    pub phase: NodePhase,
    /// Local chain height, when the node reported one
    pub height: Option<u64>,
    /// Blocks behind the best peer while synchronizing
    pub lag: Option<u64>,
    pub last_poll: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl NodeStatusSnapshot {
    pub fn ready_for_transactions(&self) -> bool {
        self.phase.is_synchronized()
    }

    /// `Ok` only when the node accepts transactions
    pub fn readiness(&self) -> Result<(), NodeNotReady> {
        match self.phase {
            NodePhase::Synchronized => Ok(()),
            NodePhase::Unavailable => Err(NodeNotReady::Unavailable),
            NodePhase::Booting => Err(NodeNotReady::NotBooted),
            NodePhase::LoadingBlocks { height } => Err(NodeNotReady::Loading { height }),
            NodePhase::Synchronizing { height, lag } => {
                Err(NodeNotReady::Synchronizing { height, lag })
            }
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub failure_threshold: u32,
    pub request_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Background poller for node status
pub struct NodeSyncMonitor {
    connector: Arc<dyn NodeConnector>,
    config: MonitorConfig,
    publisher: watch::Sender<NodeStatusSnapshot>,
    paused: AtomicBool,
    /// Serializes polls so the snapshot has a single writer
    poll_lock: Mutex<()>,
}

impl NodeSyncMonitor {
    pub fn new(connector: Arc<dyn NodeConnector>, config: MonitorConfig) -> Self {
        let (publisher, _) = watch::channel(NodeStatusSnapshot::default());
        Self {
            connector,
            config,
            publisher,
            paused: AtomicBool::new(false),
            poll_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> NodeStatusSnapshot {
        self.publisher.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStatusSnapshot> {
        self.publisher.subscribe()
    }

    pub fn ready_for_transactions(&self) -> bool {
        self.publisher.borrow().ready_for_transactions()
    }

    pub fn readiness(&self) -> Result<(), NodeNotReady> {
        self.publisher.borrow().readiness()
    }

    pub fn pause(&self) {
        log::debug!("Node status polling paused");
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        log::debug!("Node status polling resumed");
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Query the node once and publish the outcome
    pub async fn poll_once(&self) -> NodeStatusSnapshot {
        let _guard = self.poll_lock.lock().await;

        let result =
            match tokio::time::timeout(self.config.request_timeout, self.connector.node_status())
                .await
            {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout),
            };

        let previous = self.publisher.borrow().clone();
        let mut next = previous.clone();
        next.last_poll = Some(Utc::now());

        match result {
            Ok(raw) => {
                next.phase = NodePhase::from_raw(&raw);
                next.height = raw.height;
                next.lag = match next.phase {
                    NodePhase::Synchronizing { lag, .. } => Some(lag),
                    _ => None,
                };
                next.consecutive_failures = 0;
                next.last_error = None;
            }
            Err(e) => {
                next.consecutive_failures = previous.consecutive_failures.saturating_add(1);
                next.last_error = Some(e.to_string());
                if next.consecutive_failures >= self.config.failure_threshold {
                    next.phase = NodePhase::Unavailable;
                    next.lag = None;
                }
                log::warn!(
                    "Node status poll failed ({} in a row): {}",
                    next.consecutive_failures,
                    e
                );
            }
        }

        if next.phase != previous.phase {
            log::info!("Node phase {:?} -> {:?}", previous.phase, next.phase);
        }

        self.publisher.send_replace(next.clone());
        next
    }

    /// Poll until `cancel` fires; paused ticks are skipped
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Node status monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if self.is_paused() {
                        continue;
                    }
                    self.poll_once().await;
                }
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(cancel))
    }
}
