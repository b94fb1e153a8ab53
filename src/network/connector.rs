//! Node connector
//!
//! The node's status, account and transaction endpoints behind an
//! injectable trait. [`HttpNodeConnector`] talks JSON over HTTP; tests use a
//! scripted in-memory node.

use crate::core::{Amount, Transaction};
use crate::crypto::Address;
use crate::fault::{Fault, FaultCode};
use futures::future::BoxFuture;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default timeout for node requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Announce result code the node uses for success
pub const ANNOUNCE_SUCCESS: u16 = 1;

// =============================================================================
// Error Types
// =============================================================================

/// A transaction refused by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRejection {
    pub code: FaultCode,
    /// Reason exactly as the node reported it
    pub reason: String,
}

impl NodeRejection {
    /// Map a node validation result name onto a fault code
    pub fn from_reason(reason: &str) -> Self {
        let code = match reason {
            "FAILURE_INSUFFICIENT_BALANCE" => FaultCode::InsufficientBalance,
            "FAILURE_MESSAGE_TOO_LARGE" => FaultCode::MessageTooLarge,
            "FAILURE_ENTITY_ALREADY_EXISTS" | "NEUTRAL" => FaultCode::DuplicateHash,
            "FAILURE_SIGNATURE_NOT_VERIFIABLE" => FaultCode::InvalidSignature,
            "FAILURE_PAST_DEADLINE" | "FAILURE_TIMESTAMP_TOO_FAR_IN_PAST" => {
                FaultCode::StaleDeadline
            }
            "FAILURE_TIMESTAMP_TOO_FAR_IN_FUTURE" => FaultCode::TimestampTooFarInFuture,
            "FAILURE_UNKNOWN_ACCOUNT" => FaultCode::UnknownAccount,
            "FAILURE_TRANSACTION_CACHE_TOO_FULL" => FaultCode::TransactionCacheFull,
            "FAILURE_INSUFFICIENT_FEE" => FaultCode::FeeTooLow,
            "FAILURE_CONFLICTING_IMPORTANCE_TRANSFER" => FaultCode::ImportanceTransferConflict,
            "FAILURE_DESTINATION_ACCOUNT_HAS_NONZERO_BALANCE" => {
                FaultCode::RemoteAccountHasBalance
            }
            "FAILURE_IMPORTANCE_TRANSFER_IN_PROGRESS" => FaultCode::ImportanceTransferPending,
            "FAILURE_IMPORTANCE_TRANSFER_NEEDS_TO_BE_DEACTIVATED" => {
                FaultCode::HarvestingAlreadyActive
            }
            "FAILURE_IMPORTANCE_TRANSFER_NEEDS_TO_BE_ACTIVATED" => FaultCode::HarvestingNotActive,
            "FAILURE_TRANSACTION_NOT_ALLOWED_FOR_MULTISIG" => FaultCode::MultisigCannotInitiate,
            "FAILURE_MULTISIG_NOT_A_COSIGNER" => FaultCode::NotACosignatory,
            "FAILURE_MULTISIG_NO_MATCHING_MULTISIG" => FaultCode::MultisigTransactionUnknown,
            "FAILURE_MULTISIG_ALREADY_A_COSIGNER" => FaultCode::AlreadyCosignatory,
            _ => FaultCode::Unexpected,
        };
        Self {
            code,
            reason: reason.to_string(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.code == FaultCode::DuplicateHash
    }
}

/// Node communication errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node request timed out")]
    Timeout,
    #[error("Node unreachable: {0}")]
    Unreachable(String),
    #[error("Node answered with HTTP status {0}")]
    Http(u16),
    #[error("Malformed node response: {0}")]
    Malformed(String),
    #[error("Node rejected the transaction: {}", .0.reason)]
    Rejected(NodeRejection),
}

impl NodeError {
    /// Whether the request may have reached the node
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NodeError::Timeout | NodeError::Unreachable(_) | NodeError::Http(_)
        )
    }
}

impl Fault for NodeError {
    fn code(&self) -> FaultCode {
        match self {
            NodeError::Timeout | NodeError::Unreachable(_) | NodeError::Http(_) => {
                FaultCode::NodeUnavailable
            }
            NodeError::Malformed(_) => FaultCode::Unexpected,
            NodeError::Rejected(rejection) => rejection.code,
        }
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NodeError::Timeout
        } else if e.is_decode() {
            NodeError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            NodeError::Http(status.as_u16())
        } else {
            NodeError::Unreachable(e.to_string())
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Raw status as reported by the node, before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNodeStatus {
    pub code: u8,
    /// Local chain height, when the node has one
    pub height: Option<u64>,
    /// Best height among the node's peers
    pub peer_height: Option<u64>,
}

/// Delegated harvesting state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    #[default]
    Inactive,
    Activating,
    Active,
    Deactivating,
}

/// Account state as reported by the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: Address,
    #[serde(default)]
    pub public_key: Option<String>,
    pub balance: Amount,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub remote_status: RemoteStatus,
    /// Set when this account is multisig
    #[serde(default)]
    pub cosignatories: Vec<Address>,
    /// Multisig accounts this account cosigns for
    #[serde(default)]
    pub cosignatory_of: Vec<Address>,
}

/// Network-side state of a transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionStatus {
    Unknown,
    Unconfirmed {
        #[serde(default)]
        cosignatories: Vec<Address>,
    },
    Included {
        height: u64,
    },
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    code: u8,
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct AnnounceResponse {
    code: u16,
    #[serde(default)]
    message: String,
}

// =============================================================================
// Connector Trait
// =============================================================================

/// Everything the client consumes from the node
pub trait NodeConnector: Send + Sync {
    fn node_status(&self) -> BoxFuture<'_, Result<RawNodeStatus, NodeError>>;

    fn chain_height(&self) -> BoxFuture<'_, Result<u64, NodeError>>;

    fn account_info<'a>(
        &'a self,
        address: &'a Address,
    ) -> BoxFuture<'a, Result<AccountInfo, NodeError>>;

    /// Send a signed transaction; a refusal is [`NodeError::Rejected`]
    fn announce<'a>(&'a self, tx: &'a Transaction) -> BoxFuture<'a, Result<(), NodeError>>;

    fn transaction_status<'a>(
        &'a self,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<TransactionStatus, NodeError>>;
}

// =============================================================================
// HTTP Connector
// =============================================================================

/// JSON-over-HTTP node client
#[derive(Debug, Clone)]
pub struct HttpNodeConnector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNodeConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, NodeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(NodeError::Http(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn fetch_status(&self) -> Result<RawNodeStatus, NodeError> {
        let status: StatusResponse = self.get("/status", &[]).await?;
        let mut raw = RawNodeStatus {
            code: status.code,
            height: None,
            peer_height: None,
        };
        // only booted nodes have a chain to report
        if matches!(status.code, 4 | 5 | 7) {
            raw.height = Some(self.get::<HeightResponse>("/chain/height", &[]).await?.height);
        }
        if status.code == 4 {
            raw.peer_height = Some(
                self.get::<HeightResponse>("/node/peer-height", &[])
                    .await?
                    .height,
            );
        }
        Ok(raw)
    }

    async fn post_announce(&self, tx: &Transaction) -> Result<(), NodeError> {
        let url = format!("{}/transaction/announce", self.base_url);
        debug!("Announcing {} to {}", tx.hash, self.base_url);
        let response = self.client.post(&url).json(tx).send().await?;
        if !response.status().is_success() {
            return Err(NodeError::Http(response.status().as_u16()));
        }
        let result: AnnounceResponse = response.json().await?;
        if result.code == ANNOUNCE_SUCCESS {
            Ok(())
        } else {
            Err(NodeError::Rejected(NodeRejection::from_reason(&result.message)))
        }
    }
}

impl NodeConnector for HttpNodeConnector {
    fn node_status(&self) -> BoxFuture<'_, Result<RawNodeStatus, NodeError>> {
        Box::pin(self.fetch_status())
    }

    fn chain_height(&self) -> BoxFuture<'_, Result<u64, NodeError>> {
        Box::pin(async move {
            Ok(self
                .get::<HeightResponse>("/chain/height", &[])
                .await?
                .height)
        })
    }

    fn account_info<'a>(
        &'a self,
        address: &'a Address,
    ) -> BoxFuture<'a, Result<AccountInfo, NodeError>> {
        Box::pin(async move {
            self.get("/account/get", &[("address", address.as_str())])
                .await
        })
    }

    fn announce<'a>(&'a self, tx: &'a Transaction) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(self.post_announce(tx))
    }

    fn transaction_status<'a>(
        &'a self,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<TransactionStatus, NodeError>> {
        Box::pin(async move { self.get("/transaction/get", &[("hash", hash)]).await })
    }
}
