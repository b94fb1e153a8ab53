//! Node communication
//!
//! Everything that talks to the remote node.
//!
//! # Features
//! - Injectable node connector (HTTP in production)
//! - Status polling with normalized node phases
//! - Readiness gating for submissions
//! - Detached dispatch with dedup by hash
//! - Confirmation and expiry tracking

pub mod connector;
#[cfg(test)]
pub(crate) mod mock;
pub mod monitor;
pub mod tracker;

pub use connector::{
    AccountInfo, HttpNodeConnector, NodeConnector, NodeError, NodeRejection, RawNodeStatus,
    RemoteStatus, TransactionStatus, DEFAULT_REQUEST_TIMEOUT,
};
pub use monitor::{
    MonitorConfig, NodeNotReady, NodePhase, NodeStatusSnapshot, NodeSyncMonitor,
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_POLL_INTERVAL,
};
pub use tracker::{
    StatusChange, SubmissionError, SubmissionTracker, TrackedSet, TrackedStatus,
    TrackedTransaction,
};
