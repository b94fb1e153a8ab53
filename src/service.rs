//! Wallet client service
//!
//! Wires the vault, the multisig coordinator, the node monitor and the
//! submission tracker together behind the user-facing operations: send a
//! transfer, convert an account to multisig, cosign a pending multisig
//! transaction and switch delegated harvesting on or off.
//!
//! Background work (status polling, confirmation tracking and multisig
//! reconciliation) runs on tasks started with [`WalletClient::start`] and
//! stopped with [`WalletClient::shutdown`].

use crate::addressbook::{AddressBook, InMemoryAddressBook};
use crate::config::{ClientConfig, ConfigError};
use crate::core::{
    Amount, BuildError, ConversionRequest, CosignRequest, HarvestingMode,
    ImportanceTransferRequest, MessageRequest, Transaction, TransactionBuilder, TransactionKind,
    TransferRequest,
};
use crate::crypto::{Address, Network};
use crate::fault::{Fault, FaultCode};
use crate::multisig::{
    MultisigCoordinator, MultisigError, MultisigObservation, PendingMultisigTransaction,
    RejectReason,
};
use crate::network::{
    HttpNodeConnector, NodeConnector, NodeError, NodeStatusSnapshot, NodeSyncMonitor,
    RemoteStatus, StatusChange, SubmissionError, SubmissionTracker, TrackedStatus,
    TrackedTransaction, TransactionStatus,
};
use crate::vault::{
    AccountSource, AccountSummary, DecryptedHandle, VaultError, WalletSummary, WalletVault,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Multisig(#[from] MultisigError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("No account in the wallet cosigns for {0}")]
    NoCosignatoryInWallet(Address),
    #[error("Delegated harvesting of {0} is already active")]
    HarvestingAlreadyActive(Address),
    #[error("Delegated harvesting of {0} is not active")]
    HarvestingNotActive(Address),
    #[error("Delegated harvesting of {0} is changing state")]
    HarvestingInTransition(Address),
}

impl Fault for ClientError {
    fn code(&self) -> FaultCode {
        match self {
            ClientError::Vault(e) => e.code(),
            ClientError::Build(e) => e.code(),
            ClientError::Multisig(e) => e.code(),
            ClientError::Submission(e) => e.code(),
            ClientError::Node(e) => e.code(),
            ClientError::Config(e) => e.code(),
            ClientError::NoCosignatoryInWallet(_) => FaultCode::NotACosignatory,
            ClientError::HarvestingAlreadyActive(_) => FaultCode::HarvestingAlreadyActive,
            ClientError::HarvestingNotActive(_) => FaultCode::HarvestingNotActive,
            ClientError::HarvestingInTransition(_) => FaultCode::ImportanceTransferConflict,
        }
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// Cosign an inner transaction already tracked by the coordinator
#[derive(Debug, Clone)]
pub struct SignMultisigRequest {
    pub cosignatory: Address,
    pub inner_hash: String,
    pub fee: Option<Amount>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HarvestingRequest {
    pub account: Address,
    pub remote_public_key: String,
    pub mode: HarvestingMode,
    pub fee: Option<Amount>,
    pub deadline: DateTime<Utc>,
}

/// What was handed to the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub record: TrackedTransaction,
    /// Set when the submitted transaction wraps a multisig inner transaction
    pub inner_hash: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Composition root of the wallet core
#[derive(Clone)]
pub struct WalletClient {
    config: ClientConfig,
    vault: Arc<WalletVault>,
    multisig: Arc<RwLock<MultisigCoordinator>>,
    monitor: Arc<NodeSyncMonitor>,
    tracker: SubmissionTracker,
    connector: Arc<dyn NodeConnector>,
    address_book: Arc<dyn AddressBook>,
    shutdown: CancellationToken,
}

impl WalletClient {
    /// Client talking to the node configured in `config`
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let connector = HttpNodeConnector::new(&config.node_url, config.request_timeout())?;
        Self::with_parts(
            config,
            Arc::new(connector),
            Arc::new(InMemoryAddressBook::new()),
        )
    }

    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn NodeConnector>,
        address_book: Arc<dyn AddressBook>,
    ) -> Result<Self, ClientError> {
        let vault = Arc::new(WalletVault::new(config.vault_config())?);
        let monitor = Arc::new(NodeSyncMonitor::new(
            Arc::clone(&connector),
            config.monitor_config(),
        ));
        let tracker = SubmissionTracker::new(Arc::clone(&connector), Arc::clone(&monitor));
        Ok(Self {
            config,
            vault,
            multisig: Arc::new(RwLock::new(MultisigCoordinator::new())),
            monitor,
            tracker,
            connector,
            address_book,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn vault(&self) -> &WalletVault {
        &self.vault
    }

    pub fn monitor(&self) -> &Arc<NodeSyncMonitor> {
        &self.monitor
    }

    pub fn tracker(&self) -> &SubmissionTracker {
        &self.tracker
    }

    pub fn multisig(&self) -> &Arc<RwLock<MultisigCoordinator>> {
        &self.multisig
    }

    pub fn node_status(&self) -> NodeStatusSnapshot {
        self.monitor.snapshot()
    }

    /// Display label of an address, if the address book has one
    pub fn label(&self, address: &Address) -> Option<String> {
        self.address_book.label(address)
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Start polling, confirmation tracking and multisig reconciliation
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        log::info!("Starting wallet client against {}", self.config.node_url);
        vec![
            self.monitor.spawn(self.shutdown.child_token()),
            self.tracker.spawn_reconciliation(self.shutdown.child_token()),
            tokio::spawn(self.clone().forward_changes(self.shutdown.child_token())),
            tokio::spawn(self.clone().reconcile_multisig(self.shutdown.child_token())),
        ]
    }

    pub fn shutdown(&self) {
        log::info!("Stopping wallet client");
        self.shutdown.cancel();
    }

    /// Apply confirmed conversions to the cosignatory graph
    async fn forward_changes(self, cancel: CancellationToken) {
        let mut changes = self.tracker.subscribe_changes();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => self.apply_change(&change).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Missed {} status changes", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    pub(crate) async fn apply_change(&self, change: &StatusChange) {
        if !matches!(change.current, TrackedStatus::Confirmed { .. })
            || matches!(change.previous, TrackedStatus::Confirmed { .. })
        {
            return;
        }
        let Some(record) = self.tracker.get(&change.hash) else {
            return;
        };
        if matches!(
            record.transaction.kind,
            TransactionKind::MultisigConversion { .. }
        ) {
            if let Err(e) = self
                .multisig
                .write()
                .await
                .apply_conversion(&record.transaction)
            {
                log::warn!("Could not apply conversion {}: {}", change.hash, e);
            }
        }
    }

    async fn reconcile_multisig(self, cancel: CancellationToken) {
        let mut snapshots = self.monitor.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Err(e) = self.reconcile_multisig_once().await {
                        log::warn!("Multisig reconciliation failed: {}", e);
                    }
                }
            }
        }
    }

    /// Feed node observations of open multisig transactions to the coordinator
    ///
    /// Entries settled by an earlier pass are pruned first. Open entries the
    /// node still reports as unknown or unconfirmed after their inner
    /// deadline are rejected as expired.
    pub async fn reconcile_multisig_once(&self) -> Result<usize, NodeError> {
        let pruned = self.multisig.write().await.prune_finalized();
        if pruned > 0 {
            log::debug!("Pruned {} settled multisig transactions", pruned);
        }
        if !self.monitor.ready_for_transactions() {
            return Ok(0);
        }
        let hashes = self.multisig.read().await.open_hashes();

        let mut observations = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let status = match self.connector.transaction_status(&hash).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("Status query for multisig {} failed: {}", hash, e);
                    continue;
                }
            };
            let observation = match status {
                TransactionStatus::Unknown => MultisigObservation::Unknown,
                TransactionStatus::Unconfirmed { cosignatories } => {
                    MultisigObservation::Unconfirmed { cosignatories }
                }
                TransactionStatus::Included { .. } => MultisigObservation::Included,
                TransactionStatus::Rejected { reason } => {
                    MultisigObservation::Rejected(RejectReason::Network(reason))
                }
            };
            observations.push((hash, observation));
        }

        let mut multisig = self.multisig.write().await;
        let mut observed = 0;
        let mut unresolved = Vec::new();
        for (hash, observation) in observations {
            let still_open = matches!(
                observation,
                MultisigObservation::Unknown | MultisigObservation::Unconfirmed { .. }
            );
            if multisig.observe(&hash, observation).is_ok() {
                observed += 1;
                if still_open {
                    unresolved.push(hash);
                }
            }
        }
        multisig.expire_overdue(&unresolved, Utc::now());
        Ok(observed)
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    pub fn list_wallets(&self) -> Result<Vec<WalletSummary>, ClientError> {
        let names = self.vault.list_wallets()?;
        names
            .iter()
            .map(|name| self.vault.summary(name).map_err(ClientError::from))
            .collect()
    }

    pub fn create_wallet(&self, name: &str, password: &str) -> Result<WalletSummary, ClientError> {
        Ok(self.vault.create_wallet(name, password)?)
    }

    pub fn add_account(
        &self,
        wallet: &str,
        password: &str,
        source: AccountSource,
        label: Option<String>,
    ) -> Result<AccountSummary, ClientError> {
        Ok(self.vault.add_account(wallet, password, source, label)?)
    }

    /// Pull balances, importance and multisig links of every account
    pub async fn refresh_accounts(&self, wallet: &str) -> Result<WalletSummary, ClientError> {
        let summary = self.vault.summary(wallet)?;
        for account in &summary.accounts {
            let info = self.connector.account_info(&account.address).await?;
            self.vault.refresh_account_snapshot(
                wallet,
                &account.address,
                info.balance,
                info.importance,
            )?;

            if !info.cosignatories.is_empty() {
                self.multisig.write().await.register_account(
                    info.address.clone(),
                    info.public_key.clone().unwrap_or_default(),
                    info.cosignatories.iter().cloned(),
                );
            }
            for multisig_address in &info.cosignatory_of {
                let multisig_info = self.connector.account_info(multisig_address).await?;
                self.multisig.write().await.register_account(
                    multisig_info.address,
                    multisig_info.public_key.unwrap_or_default(),
                    multisig_info.cosignatories,
                );
            }
        }
        Ok(self.vault.summary(wallet)?)
    }

    pub async fn pending_multisig(&self) -> Vec<PendingMultisigTransaction> {
        self.multisig
            .read()
            .await
            .list_pending()
            .into_iter()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn send_transfer(
        &self,
        wallet: &str,
        password: &str,
        mut request: TransferRequest,
    ) -> Result<SubmissionReceipt, ClientError> {
        let handle = self.vault.unlock(wallet, password)?;
        self.resolve_recipient_key(&mut request).await;

        let now = Utc::now();
        let tx = {
            let multisig = self.multisig.read().await;
            TransactionBuilder::new(&self.vault, &multisig, self.network())
                .transfer(&handle, request, now)?
        };
        self.submit_built(&handle, tx, now).await
    }

    /// Ask the node for the recipient's key when an encrypted message lacks one
    async fn resolve_recipient_key(&self, request: &mut TransferRequest) {
        let Some(MessageRequest::Encrypted {
            recipient_public_key: recipient_public_key @ None,
            ..
        }) = &mut request.message
        else {
            return;
        };
        let Ok(recipient) = Address::parse(&request.recipient, self.network()) else {
            return;
        };
        match self.connector.account_info(&recipient).await {
            Ok(info) => *recipient_public_key = info.public_key,
            Err(e) => log::debug!("No public key for {}: {}", recipient, e),
        }
    }

    pub async fn convert_to_multisig(
        &self,
        wallet: &str,
        password: &str,
        request: ConversionRequest,
    ) -> Result<SubmissionReceipt, ClientError> {
        let handle = self.vault.unlock(wallet, password)?;
        let now = Utc::now();
        let tx = {
            let multisig = self.multisig.read().await;
            TransactionBuilder::new(&self.vault, &multisig, self.network())
                .multisig_conversion(&handle, request, now)?
        };
        self.submit_built(&handle, tx, now).await
    }

    /// Add this wallet's cosignature to a pending multisig transaction
    pub async fn sign_multisig(
        &self,
        wallet: &str,
        password: &str,
        request: SignMultisigRequest,
    ) -> Result<SubmissionReceipt, ClientError> {
        let handle = self.vault.unlock(wallet, password)?;
        let now = Utc::now();
        let wrapper = {
            let multisig = self.multisig.read().await;
            let pending = multisig.get(&request.inner_hash)?;
            if pending.state.is_terminal() {
                return Err(MultisigError::Finalized(request.inner_hash).into());
            }
            let inner = pending.inner.clone();
            TransactionBuilder::new(&self.vault, &multisig, self.network()).cosign(
                &handle,
                CosignRequest {
                    cosignatory: request.cosignatory,
                    inner,
                    fee: request.fee,
                    deadline: request.deadline,
                },
                now,
            )?
        };
        self.submit_cosignature(wrapper).await
    }

    /// Activate or deactivate delegated harvesting
    pub async fn set_harvesting(
        &self,
        wallet: &str,
        password: &str,
        request: HarvestingRequest,
    ) -> Result<SubmissionReceipt, ClientError> {
        let handle = self.vault.unlock(wallet, password)?;
        let info = self.connector.account_info(&request.account).await?;
        match (request.mode, info.remote_status) {
            (_, RemoteStatus::Activating | RemoteStatus::Deactivating) => {
                return Err(ClientError::HarvestingInTransition(request.account));
            }
            (HarvestingMode::Activate, RemoteStatus::Active) => {
                return Err(ClientError::HarvestingAlreadyActive(request.account));
            }
            (HarvestingMode::Deactivate, RemoteStatus::Inactive) => {
                return Err(ClientError::HarvestingNotActive(request.account));
            }
            _ => {}
        }

        let now = Utc::now();
        let tx = {
            let multisig = self.multisig.read().await;
            TransactionBuilder::new(&self.vault, &multisig, self.network()).importance_transfer(
                &handle,
                ImportanceTransferRequest {
                    sender: request.account,
                    remote_public_key: request.remote_public_key,
                    mode: request.mode,
                    fee: request.fee,
                    deadline: request.deadline,
                },
                now,
            )?
        };
        self.submit_built(&handle, tx, now).await
    }

    /// Submit directly, or cosign first when the transaction is
    /// multisig-originated
    async fn submit_built(
        &self,
        handle: &DecryptedHandle,
        tx: Transaction,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, ClientError> {
        if !tx.multisig_originated {
            let record = self.tracker.submit(tx).await?;
            return Ok(SubmissionReceipt {
                record,
                inner_hash: None,
            });
        }

        let wrapper = {
            let multisig = self.multisig.read().await;
            let account = multisig
                .account(&tx.sender)
                .ok_or_else(|| MultisigError::UnknownMultisigAccount(tx.sender.clone()))?;
            let cosignatory = handle
                .summary()
                .accounts
                .iter()
                .map(|a| &a.address)
                .find(|address| account.cosignatories.contains(*address))
                .cloned()
                .ok_or_else(|| ClientError::NoCosignatoryInWallet(tx.sender.clone()))?;
            let deadline = tx.deadline;
            TransactionBuilder::new(&self.vault, &multisig, self.network()).cosign(
                handle,
                CosignRequest {
                    cosignatory,
                    inner: tx,
                    fee: None,
                    deadline,
                },
                now,
            )?
        };
        self.submit_cosignature(wrapper).await
    }

    async fn submit_cosignature(&self, wrapper: Transaction) -> Result<SubmissionReceipt, ClientError> {
        let inner_hash = wrapper.inner().map(|inner| inner.hash.clone());
        self.multisig.read().await.check_cosignature(&wrapper)?;
        // only cosignatures the node took count as progress
        let record = self.tracker.submit(wrapper.clone()).await?;
        if let Err(e) = self.multisig.write().await.record_cosignature(&wrapper) {
            log::warn!("Accepted cosignature {} not recorded: {}", record.hash, e);
        }
        Ok(SubmissionReceipt { record, inner_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::multisig::PendingState;
    use crate::network::mock::MockNode;
    use crate::network::AccountInfo;
    use crate::vault::KdfParams;
    use chrono::Duration;
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    struct Fixture {
        _dir: TempDir,
        node: Arc<MockNode>,
        client: WalletClient,
        alice: Address,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig {
            data_dir: dir.path().to_path_buf(),
            network: Network::Testnet,
            kdf: KdfParams::insecure_fast(),
            ..Default::default()
        };
        let node = Arc::new(MockNode::synchronized(100));
        let client = WalletClient::with_parts(
            config,
            node.clone(),
            Arc::new(InMemoryAddressBook::new()),
        )
        .unwrap();
        client.monitor().poll_once().await;
        client.create_wallet("main", "pw").unwrap();
        let alice = client
            .add_account("main", "pw", AccountSource::Generate, None)
            .unwrap()
            .address;
        Fixture {
            _dir: dir,
            node,
            client,
            alice,
        }
    }

    fn import(f: &Fixture, key: &KeyPair) -> Address {
        f.client
            .add_account(
                "main",
                "pw",
                AccountSource::Import(Zeroizing::new(hex::encode(*key.secret_bytes()))),
                None,
            )
            .unwrap()
            .address
    }

    fn account_info(address: &Address, remote_status: RemoteStatus) -> AccountInfo {
        AccountInfo {
            address: address.clone(),
            public_key: None,
            balance: Amount::from_coins(500),
            importance: 0.25,
            remote_status,
            cosignatories: Vec::new(),
            cosignatory_of: Vec::new(),
        }
    }

    fn transfer(sender: &Address) -> TransferRequest {
        TransferRequest {
            sender: sender.clone(),
            recipient: KeyPair::generate().address(Network::Testnet).to_string(),
            amount: Amount::from_coins(5),
            message: None,
            fee: None,
            deadline: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_send_transfer() {
        let f = fixture().await;
        let receipt = f
            .client
            .send_transfer("main", "pw", transfer(&f.alice))
            .await
            .unwrap();
        assert_eq!(receipt.record.status, TrackedStatus::Pending);
        assert!(receipt.inner_hash.is_none());
        assert_eq!(f.node.announced().len(), 1);
        assert_eq!(f.node.announced()[0].sender, f.alice);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let f = fixture().await;
        let err = f
            .client
            .send_transfer("main", "nope", transfer(&f.alice))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FaultCode::WrongPassword);
        assert!(f.node.announced().is_empty());
    }

    #[tokio::test]
    async fn test_multisig_transfer_goes_out_wrapped() {
        let f = fixture().await;
        let m = KeyPair::generate();
        let m_address = m.address(Network::Testnet);
        let x = KeyPair::generate();
        let x_address = import(&f, &x);
        let y = KeyPair::generate().address(Network::Testnet);
        f.client.multisig().write().await.register_account(
            m_address.clone(),
            m.public_key_hex(),
            [x_address.clone(), y.clone()],
        );

        let receipt = f
            .client
            .send_transfer("main", "pw", transfer(&m_address))
            .await
            .unwrap();
        let inner_hash = receipt.inner_hash.unwrap();

        let announced = f.node.announced();
        assert_eq!(announced.len(), 1);
        assert!(announced[0].is_multisig_wrapper());
        assert_eq!(announced[0].sender, x_address);

        let pending = f.client.pending_multisig().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].inner_hash, inner_hash);
        assert_eq!(pending[0].state, PendingState::PartiallySigned);
        assert!(!pending[0].nominally_complete());

        // the node reports inclusion; only then is it confirmed
        f.node
            .set_tx_status(&inner_hash, TransactionStatus::Included { height: 100 });
        assert_eq!(f.client.reconcile_multisig_once().await.unwrap(), 1);
        let pending = f.client.pending_multisig().await;
        assert_eq!(pending[0].state, PendingState::Confirmed);
    }

    async fn register_multisig(f: &Fixture) -> (Address, Address) {
        let m = KeyPair::generate();
        let m_address = m.address(Network::Testnet);
        let x_address = import(f, &KeyPair::generate());
        let y = KeyPair::generate().address(Network::Testnet);
        f.client.multisig().write().await.register_account(
            m_address.clone(),
            m.public_key_hex(),
            [x_address.clone(), y],
        );
        (m_address, x_address)
    }

    #[tokio::test]
    async fn test_failed_multisig_submit_records_no_cosignature() {
        let f = fixture().await;
        let (m_address, _x) = register_multisig(&f).await;
        f.node
            .push_status(Ok(MockNode::status(4, Some(50), Some(55))));
        f.client.monitor().poll_once().await;

        let err = f
            .client
            .send_transfer("main", "pw", transfer(&m_address))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FaultCode::NodeSynchronizing);

        assert!(f.client.pending_multisig().await.is_empty());
        assert!(f.node.announced().is_empty());
    }

    #[tokio::test]
    async fn test_overdue_multisig_expires_and_is_pruned() {
        let f = fixture().await;
        let (m_address, _x) = register_multisig(&f).await;
        let mut request = transfer(&m_address);
        request.deadline = Utc::now() + Duration::seconds(2);
        let inner_hash = f
            .client
            .send_transfer("main", "pw", request)
            .await
            .unwrap()
            .inner_hash
            .unwrap();

        // still inside the deadline: the node not knowing it changes nothing
        assert_eq!(f.client.reconcile_multisig_once().await.unwrap(), 1);
        assert_eq!(
            f.client.pending_multisig().await[0].state,
            PendingState::PartiallySigned
        );

        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
        f.node.set_tx_status(&inner_hash, TransactionStatus::Unknown);
        f.client.reconcile_multisig_once().await.unwrap();
        let pending = f.client.pending_multisig().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].state,
            PendingState::Rejected {
                reason: RejectReason::Expired
            }
        );
        assert!(f.client.multisig().read().await.open_hashes().is_empty());

        // settled entries are dropped on the next pass
        f.client.reconcile_multisig_once().await.unwrap();
        assert!(f.client.pending_multisig().await.is_empty());
    }

    #[tokio::test]
    async fn test_multisig_reconcile_skips_failed_queries() {
        let f = fixture().await;
        let (m_address, _x) = register_multisig(&f).await;
        let failing = f
            .client
            .send_transfer("main", "pw", transfer(&m_address))
            .await
            .unwrap()
            .inner_hash
            .unwrap();
        let included = f
            .client
            .send_transfer("main", "pw", transfer(&m_address))
            .await
            .unwrap()
            .inner_hash
            .unwrap();
        f.node
            .fail_tx_status(&failing, NodeError::Unreachable("timeout".into()));
        f.node
            .set_tx_status(&included, TransactionStatus::Included { height: 100 });

        assert_eq!(f.client.reconcile_multisig_once().await.unwrap(), 1);
        let multisig = f.client.multisig().read().await;
        assert_eq!(multisig.get(&included).unwrap().state, PendingState::Confirmed);
        assert_eq!(
            multisig.get(&failing).unwrap().state,
            PendingState::PartiallySigned
        );
    }

    #[tokio::test]
    async fn test_sign_multisig_requires_cosignatory() {
        let f = fixture().await;
        let m = KeyPair::generate();
        let m_address = m.address(Network::Testnet);
        let x = KeyPair::generate();
        let x_address = import(&f, &x);
        let y = KeyPair::generate();
        let y_address = import(&f, &y);
        f.client.multisig().write().await.register_account(
            m_address.clone(),
            m.public_key_hex(),
            [x_address.clone(), y_address.clone()],
        );

        let receipt = f
            .client
            .send_transfer("main", "pw", transfer(&m_address))
            .await
            .unwrap();
        let inner_hash = receipt.inner_hash.unwrap();

        let err = f
            .client
            .sign_multisig(
                "main",
                "pw",
                SignMultisigRequest {
                    cosignatory: f.alice.clone(),
                    inner_hash: inner_hash.clone(),
                    fee: None,
                    deadline: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 741);
        let pending = f.client.pending_multisig().await;
        assert_eq!(pending[0].signature_count(), 1);

        let receipt = f
            .client
            .sign_multisig(
                "main",
                "pw",
                SignMultisigRequest {
                    cosignatory: y_address.clone(),
                    inner_hash: inner_hash.clone(),
                    fee: None,
                    deadline: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.inner_hash.as_deref(), Some(inner_hash.as_str()));
        let pending = f.client.pending_multisig().await;
        assert_eq!(pending[0].signature_count(), 2);
        assert!(pending[0].nominally_complete());
        // nominal completion is not confirmation
        assert_eq!(pending[0].state, PendingState::PartiallySigned);
    }

    #[tokio::test]
    async fn test_sign_unknown_multisig_transaction() {
        let f = fixture().await;
        let err = f
            .client
            .sign_multisig(
                "main",
                "pw",
                SignMultisigRequest {
                    cosignatory: f.alice.clone(),
                    inner_hash: "00".repeat(32),
                    fee: None,
                    deadline: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), FaultCode::MultisigTransactionUnknown);
    }

    #[tokio::test]
    async fn test_harvesting_state_checks() {
        let f = fixture().await;
        let remote = KeyPair::generate().public_key_hex();
        let request = |mode| HarvestingRequest {
            account: f.alice.clone(),
            remote_public_key: remote.clone(),
            mode,
            fee: None,
            deadline: Utc::now() + Duration::hours(1),
        };

        f.node
            .set_account(account_info(&f.alice, RemoteStatus::Active));
        let err = f
            .client
            .set_harvesting("main", "pw", request(HarvestingMode::Activate))
            .await
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 733);

        f.node
            .set_account(account_info(&f.alice, RemoteStatus::Inactive));
        let err = f
            .client
            .set_harvesting("main", "pw", request(HarvestingMode::Deactivate))
            .await
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 734);

        f.node
            .set_account(account_info(&f.alice, RemoteStatus::Activating));
        let err = f
            .client
            .set_harvesting("main", "pw", request(HarvestingMode::Activate))
            .await
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 730);

        f.node
            .set_account(account_info(&f.alice, RemoteStatus::Inactive));
        let receipt = f
            .client
            .set_harvesting("main", "pw", request(HarvestingMode::Activate))
            .await
            .unwrap();
        assert_eq!(receipt.record.transaction.fee, Amount::from_coins(6));
    }

    #[tokio::test]
    async fn test_refresh_accounts_registers_multisig() {
        let f = fixture().await;
        let m = KeyPair::generate();
        let m_address = m.address(Network::Testnet);

        let mut alice_info = account_info(&f.alice, RemoteStatus::Inactive);
        alice_info.cosignatory_of = vec![m_address.clone()];
        f.node.set_account(alice_info);
        let mut m_info = account_info(&m_address, RemoteStatus::Inactive);
        m_info.public_key = Some(m.public_key_hex());
        m_info.cosignatories = vec![f.alice.clone()];
        f.node.set_account(m_info);

        let summary = f.client.refresh_accounts("main").await.unwrap();
        assert_eq!(summary.accounts[0].balance, Amount::from_coins(500));
        assert_eq!(summary.accounts[0].importance, 0.25);

        let multisig = f.client.multisig().read().await;
        assert!(multisig.is_multisig(&m_address));
        assert_eq!(multisig.account(&m_address).unwrap().public_key, m.public_key_hex());
    }

    #[tokio::test]
    async fn test_confirmed_conversion_updates_graph() {
        let f = fixture().await;
        let x = KeyPair::generate().address(Network::Testnet);
        let receipt = f
            .client
            .convert_to_multisig(
                "main",
                "pw",
                ConversionRequest {
                    account: f.alice.clone(),
                    cosignatories: vec![x.to_string()],
                    fee: None,
                    deadline: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .unwrap();
        assert!(!f.client.multisig().read().await.is_multisig(&f.alice));

        let mut changes = f.client.tracker().subscribe_changes();
        f.node.set_tx_status(
            &receipt.record.hash,
            TransactionStatus::Included { height: 99 },
        );
        f.client.tracker().reconcile_once().await.unwrap();
        let change = changes.recv().await.unwrap();
        f.client.apply_change(&change).await;

        let multisig = f.client.multisig().read().await;
        assert!(multisig.is_multisig(&f.alice));
        assert!(multisig.graph().is_cosignatory(&f.alice, &x));
    }

    #[tokio::test]
    async fn test_self_cosignatory_conversion_never_reaches_node() {
        let f = fixture().await;
        let err = f
            .client
            .convert_to_multisig(
                "main",
                "pw",
                ConversionRequest {
                    account: f.alice.clone(),
                    cosignatories: vec![f.alice.to_string()],
                    fee: None,
                    deadline: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 744);
        assert!(f.node.announced().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let f = fixture().await;
        let handles = f.client.start();
        f.client.shutdown();
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
