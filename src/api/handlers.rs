//! REST API handlers for wallet operations

use crate::core::{
    Amount, ConversionRequest, HarvestingMode, MessageRequest, TransferRequest, ValidationError,
};
use crate::crypto::Address;
use crate::fault::{Fault, FaultClass, FaultCode, FaultReport};
use crate::multisig::PendingMultisigTransaction;
use crate::network::{NodeStatusSnapshot, TrackedTransaction};
use crate::service::{HarvestingRequest, SignMultisigRequest, SubmissionReceipt, WalletClient};
use crate::vault::{AccountSource, AccountSummary, WalletSummary};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Deadline used when a request does not set one
pub const DEFAULT_HOURS_DUE: u32 = 1;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub client: WalletClient,
}

// ============================================================================
// Errors
// ============================================================================

/// Fault rendered as `{ code, class, detail }`
#[derive(Debug)]
pub struct ApiError(pub FaultReport);

impl<F: Fault> From<F> for ApiError {
    fn from(fault: F) -> Self {
        ApiError(FaultReport::from_fault(&fault))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.class == FaultClass::Transient {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        match self.0.code {
            c if c == FaultCode::WrongPassword.as_u16()
                || c == FaultCode::PasswordMissing.as_u16() =>
            {
                StatusCode::UNAUTHORIZED
            }
            c if c == FaultCode::NotACosignatory.as_u16() => StatusCode::FORBIDDEN,
            c if c == FaultCode::WalletNotFound.as_u16()
                || c == FaultCode::MultisigTransactionUnknown.as_u16() =>
            {
                StatusCode::NOT_FOUND
            }
            c if c == FaultCode::DuplicateHash.as_u16()
                || c == FaultCode::WalletNameExists.as_u16()
                || c == FaultCode::AccountAlreadyInWallet.as_u16() =>
            {
                StatusCode::CONFLICT
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.0)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct NodeStatusResponse {
    #[serde(flatten)]
    pub snapshot: NodeStatusSnapshot,
    pub ready_for_transactions: bool,
}

#[derive(Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub record: TrackedTransaction,
    /// Address book label of the recipient, for transfers
    pub recipient_label: Option<String>,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct CreateWalletRequest {
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct AddAccountRequest {
    pub password: String,
    /// Hex secret key to import; a new key is generated when absent
    pub private_key: Option<String>,
    pub label: Option<String>,
}

#[derive(Deserialize)]
pub struct TransferBody {
    pub wallet: String,
    pub password: String,
    pub sender: String,
    pub recipient: String,
    /// Micro-units
    pub amount: Amount,
    pub message: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
    pub recipient_public_key: Option<String>,
    pub fee: Option<Amount>,
    pub hours_due: Option<u32>,
}

#[derive(Deserialize)]
pub struct ConversionBody {
    pub wallet: String,
    pub password: String,
    pub account: String,
    pub cosignatories: Vec<String>,
    pub fee: Option<Amount>,
    pub hours_due: Option<u32>,
}

#[derive(Deserialize)]
pub struct SignatureBody {
    pub wallet: String,
    pub password: String,
    pub cosignatory: String,
    pub inner_hash: String,
    pub fee: Option<Amount>,
    pub hours_due: Option<u32>,
}

#[derive(Deserialize)]
pub struct HarvestingBody {
    pub wallet: String,
    pub password: String,
    pub account: String,
    pub remote_public_key: String,
    pub mode: HarvestingMode,
    pub fee: Option<Amount>,
    pub hours_due: Option<u32>,
}

fn deadline(hours_due: Option<u32>) -> DateTime<Utc> {
    Utc::now() + Duration::hours(i64::from(hours_due.unwrap_or(DEFAULT_HOURS_DUE)))
}

fn parse_address(state: &ApiState, address: &str) -> Result<Address, ApiError> {
    Address::parse(address, state.client.network())
        .map_err(|e| ApiError::from(ValidationError::from(e)))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/node/status - Latest node snapshot
pub async fn get_node_status(State(state): State<ApiState>) -> Json<NodeStatusResponse> {
    let snapshot = state.client.node_status();
    Json(NodeStatusResponse {
        ready_for_transactions: snapshot.ready_for_transactions(),
        snapshot,
    })
}

/// GET /api/wallets - List wallets
pub async fn list_wallets(State(state): State<ApiState>) -> ApiResult<Vec<WalletSummary>> {
    Ok(Json(state.client.list_wallets()?))
}

/// POST /api/wallets - Create wallet
pub async fn create_wallet(
    State(state): State<ApiState>,
    Json(req): Json<CreateWalletRequest>,
) -> ApiResult<WalletSummary> {
    Ok(Json(state.client.create_wallet(&req.name, &req.password)?))
}

/// POST /api/wallets/{name}/accounts - Generate or import an account
pub async fn add_account(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<AddAccountRequest>,
) -> ApiResult<AccountSummary> {
    let source = match req.private_key {
        Some(key) => AccountSource::Import(Zeroizing::new(key)),
        None => AccountSource::Generate,
    };
    Ok(Json(state.client.add_account(
        &name,
        &req.password,
        source,
        req.label,
    )?))
}

/// POST /api/transfers - Send a transfer
pub async fn send_transfer(
    State(state): State<ApiState>,
    Json(req): Json<TransferBody>,
) -> ApiResult<SubmissionReceipt> {
    let sender = parse_address(&state, &req.sender)?;
    let message = req.message.map(|text| {
        let bytes = text.into_bytes();
        if req.encrypt {
            MessageRequest::Encrypted {
                plaintext: bytes,
                recipient_public_key: req.recipient_public_key.clone(),
            }
        } else {
            MessageRequest::Plain(bytes)
        }
    });
    let request = TransferRequest {
        sender,
        recipient: req.recipient,
        amount: req.amount,
        message,
        fee: req.fee,
        deadline: deadline(req.hours_due),
    };
    Ok(Json(
        state
            .client
            .send_transfer(&req.wallet, &req.password, request)
            .await?,
    ))
}

/// POST /api/multisig/conversions - Convert an account to multisig
pub async fn convert_to_multisig(
    State(state): State<ApiState>,
    Json(req): Json<ConversionBody>,
) -> ApiResult<SubmissionReceipt> {
    let request = ConversionRequest {
        account: parse_address(&state, &req.account)?,
        cosignatories: req.cosignatories,
        fee: req.fee,
        deadline: deadline(req.hours_due),
    };
    Ok(Json(
        state
            .client
            .convert_to_multisig(&req.wallet, &req.password, request)
            .await?,
    ))
}

/// POST /api/multisig/signatures - Cosign a pending multisig transaction
pub async fn sign_multisig(
    State(state): State<ApiState>,
    Json(req): Json<SignatureBody>,
) -> ApiResult<SubmissionReceipt> {
    let request = SignMultisigRequest {
        cosignatory: parse_address(&state, &req.cosignatory)?,
        inner_hash: req.inner_hash,
        fee: req.fee,
        deadline: deadline(req.hours_due),
    };
    Ok(Json(
        state
            .client
            .sign_multisig(&req.wallet, &req.password, request)
            .await?,
    ))
}

/// GET /api/multisig/pending - Pending multisig transactions
pub async fn list_pending_multisig(
    State(state): State<ApiState>,
) -> Json<Vec<PendingMultisigTransaction>> {
    Json(state.client.pending_multisig().await)
}

/// POST /api/harvesting - Activate or deactivate delegated harvesting
pub async fn set_harvesting(
    State(state): State<ApiState>,
    Json(req): Json<HarvestingBody>,
) -> ApiResult<SubmissionReceipt> {
    let request = HarvestingRequest {
        account: parse_address(&state, &req.account)?,
        remote_public_key: req.remote_public_key,
        mode: req.mode,
        fee: req.fee,
        deadline: deadline(req.hours_due),
    };
    Ok(Json(
        state
            .client
            .set_harvesting(&req.wallet, &req.password, request)
            .await?,
    ))
}

/// GET /api/transactions - Tracked submissions, oldest first
pub async fn list_transactions(State(state): State<ApiState>) -> Json<Vec<TransactionView>> {
    let views = state
        .client
        .tracker()
        .list()
        .iter()
        .map(|record| TransactionView {
            recipient_label: record
                .transaction
                .recipient()
                .and_then(|r| state.client.label(r)),
            record: record.clone(),
        })
        .collect();
    Json(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressbook::InMemoryAddressBook;
    use crate::config::ClientConfig;
    use crate::crypto::{KeyPair, Network};
    use crate::network::mock::MockNode;
    use crate::network::TrackedStatus;
    use crate::vault::{KdfParams, VaultError};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn state(node: MockNode) -> (TempDir, ApiState) {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig {
            data_dir: dir.path().to_path_buf(),
            network: Network::Testnet,
            kdf: KdfParams::insecure_fast(),
            ..Default::default()
        };
        let client = WalletClient::with_parts(
            config,
            Arc::new(node),
            Arc::new(InMemoryAddressBook::new()),
        )
        .unwrap();
        client.monitor().poll_once().await;
        (dir, ApiState { client })
    }

    async fn wallet_with_account(state: &ApiState) -> AccountSummary {
        create_wallet(
            State(state.clone()),
            Json(CreateWalletRequest {
                name: "main".into(),
                password: "pw".into(),
            }),
        )
        .await
        .unwrap();
        add_account(
            State(state.clone()),
            Path("main".into()),
            Json(AddAccountRequest {
                password: "pw".into(),
                private_key: None,
                label: Some("spending".into()),
            }),
        )
        .await
        .unwrap()
        .0
    }

    fn transfer_body(sender: &Address) -> TransferBody {
        TransferBody {
            wallet: "main".into(),
            password: "pw".into(),
            sender: sender.to_string(),
            recipient: KeyPair::generate().address(Network::Testnet).to_string(),
            amount: Amount::from_coins(2),
            message: Some("rent".into()),
            encrypt: false,
            recipient_public_key: None,
            fee: None,
            hours_due: None,
        }
    }

    #[test]
    fn test_fault_status_mapping() {
        assert_eq!(
            ApiError::from(VaultError::WrongPassword).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(VaultError::Busy("main".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ValidationError::DeadlineTooLate).status(),
            StatusCode::BAD_REQUEST
        );
        let report = ApiError::from(VaultError::WrongPassword).0;
        assert_eq!(report.code, 104);
        assert_eq!(report.class, FaultClass::Permanent);
    }

    #[tokio::test]
    async fn test_transfer_round_trip() {
        let (_dir, state) = state(MockNode::synchronized(10)).await;
        let account = wallet_with_account(&state).await;

        let receipt = send_transfer(State(state.clone()), Json(transfer_body(&account.address)))
            .await
            .unwrap()
            .0;
        assert_eq!(receipt.record.status, TrackedStatus::Pending);

        let listed = list_transactions(State(state.clone())).await.0;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].record.hash, receipt.record.hash);

        let wallets = list_wallets(State(state)).await.unwrap().0;
        assert_eq!(wallets[0].accounts[0].label.as_deref(), Some("spending"));
    }

    #[tokio::test]
    async fn test_transfer_while_synchronizing_is_503() {
        let node = MockNode::new();
        node.push_status(Ok(MockNode::status(4, Some(50), Some(55))));
        let (_dir, state) = state(node).await;
        let account = wallet_with_account(&state).await;

        let err = send_transfer(State(state.clone()), Json(transfer_body(&account.address)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.0.code, 603);

        let status = get_node_status(State(state)).await.0;
        assert!(!status.ready_for_transactions);
    }

    #[tokio::test]
    async fn test_bad_sender_address() {
        let (_dir, state) = state(MockNode::synchronized(10)).await;
        wallet_with_account(&state).await;
        let mut body = transfer_body(&KeyPair::generate().address(Network::Testnet));
        body.sender = "not-an-address".into();

        let err = send_transfer(State(state), Json(body)).await.unwrap_err();
        assert_eq!(err.0.code, 128);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
