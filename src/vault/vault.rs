//! Wallet vault
//!
//! Owns the encrypted wallet containers. Plaintext private keys exist only
//! inside [`WalletVault::with_signing_key`], which decrypts one account's
//! key, lends it to a closure and erases it on every exit path.
//!
//! Mutations of one wallet are serialized: a second concurrent mutation
//! fails with [`VaultError::Busy`] instead of waiting.

use super::cipher::{self, CipherError, KdfParams, Kek};
use super::container::{
    AccountRecord, AccountSnapshot, ContainerBody, StoredContainer, WalletStore,
    CONTAINER_VERSION,
};
use crate::core::Amount;
use crate::crypto::{Address, KeyError, KeyPair, Network, SigningKey};
use crate::fault::{Fault, FaultCode};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use zeroize::Zeroizing;

/// Known plaintext sealed into every container
const PASSWORD_CHECK: &[u8] = b"wallet-core password check v1";

const PASSWORD_CHECK_AAD: &[u8] = b"password-check";

// =============================================================================
// Error Types
// =============================================================================

/// Why an account cannot be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalBlock {
    Primary,
    NonZeroBalance,
}

impl fmt::Display for RemovalBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalBlock::Primary => write!(f, "it is the primary account"),
            RemovalBlock::NonZeroBalance => write!(f, "its cached balance is not zero"),
        }
    }
}

/// Vault errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Wallet '{0}' not found")]
    NotFound(String),
    #[error("Wallet is corrupt: {0}")]
    Corrupt(String),
    #[error("Wrong password")]
    WrongPassword,
    #[error("Password missing")]
    PasswordMissing,
    #[error("Wallet handle is no longer valid")]
    WalletNotOpen,
    #[error("Account {0} is not in the wallet")]
    AccountNotInWallet(Address),
    #[error("Account {address} cannot be removed: {reason}")]
    AccountNotRemovable {
        address: Address,
        reason: RemovalBlock,
    },
    #[error("Wallet '{0}' already exists")]
    NameExists(String),
    #[error("Name '{0}' is already used by another entry in the wallet directory")]
    NameCollidesWithContainer(String),
    #[error("Account {0} is already in the wallet")]
    AccountAlreadyInWallet(Address),
    #[error("Wallet '{0}' is busy with another change")]
    Busy(String),
    #[error("Invalid wallet name '{0}'")]
    InvalidName(String),
    #[error("Invalid private key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Fault for VaultError {
    fn code(&self) -> FaultCode {
        match self {
            VaultError::NotFound(_) => FaultCode::WalletNotFound,
            VaultError::Corrupt(_) => FaultCode::WalletCorrupt,
            VaultError::WrongPassword => FaultCode::WrongPassword,
            VaultError::PasswordMissing => FaultCode::PasswordMissing,
            VaultError::WalletNotOpen => FaultCode::WalletNotOpen,
            VaultError::AccountNotInWallet(_) => FaultCode::AccountNotInWallet,
            VaultError::AccountNotRemovable { .. } => FaultCode::AccountNotRemovable,
            VaultError::NameExists(_) => FaultCode::WalletNameExists,
            VaultError::NameCollidesWithContainer(_) => {
                FaultCode::WalletNameCollidesWithContainer
            }
            VaultError::AccountAlreadyInWallet(_) => FaultCode::AccountAlreadyInWallet,
            VaultError::Busy(_) => FaultCode::WalletBusy,
            VaultError::InvalidName(_) => FaultCode::InvalidWalletName,
            VaultError::InvalidKey(_) => FaultCode::InvalidParameter,
            VaultError::Io(_) => FaultCode::Unexpected,
        }
    }
}

fn corrupt(e: CipherError) -> VaultError {
    VaultError::Corrupt(e.to_string())
}

// =============================================================================
// Public Views
// =============================================================================

/// Account information that is safe to hand out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub address: Address,
    pub label: Option<String>,
    pub public_key: Option<String>,
    pub primary: bool,
    pub balance: Amount,
    pub importance: f64,
}

/// Wallet information that is safe to hand out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub name: String,
    pub network: Network,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accounts: Vec<AccountSummary>,
}

impl WalletSummary {
    fn from_container(container: &StoredContainer) -> Self {
        let accounts = container
            .body
            .accounts
            .iter()
            .map(|record| {
                let snapshot = container.snapshots.get(&record.address);
                AccountSummary {
                    address: record.address.clone(),
                    label: record.label.clone(),
                    public_key: record.public_key.clone(),
                    primary: record.primary,
                    balance: snapshot.map(|s| s.balance).unwrap_or(Amount::ZERO),
                    importance: snapshot.map(|s| s.importance).unwrap_or(0.0),
                }
            })
            .collect();
        Self {
            name: container.body.name.clone(),
            network: container.body.network,
            created_at: container.body.created_at,
            modified_at: container.body.modified_at,
            accounts,
        }
    }

    pub fn primary(&self) -> Option<&AccountSummary> {
        self.accounts.iter().find(|a| a.primary)
    }
}

/// An unlocked wallet
///
/// Holds the derived key-encryption key, never a plaintext private key.
/// The key is wiped when the handle is dropped.
pub struct DecryptedHandle {
    wallet: String,
    salt: String,
    kek: Kek,
    summary: WalletSummary,
}

impl DecryptedHandle {
    pub fn wallet_name(&self) -> &str {
        &self.wallet
    }

    pub fn summary(&self) -> &WalletSummary {
        &self.summary
    }

    pub fn network(&self) -> Network {
        self.summary.network
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.summary.accounts.iter().any(|a| &a.address == address)
    }
}

impl fmt::Debug for DecryptedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedHandle")
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

/// Where a new account's key comes from
pub enum AccountSource {
    Generate,
    /// Hex-encoded secret key
    Import(Zeroizing<String>),
}

// =============================================================================
// Vault
// =============================================================================

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub network: Network,
    pub kdf: KdfParams,
}

/// Releases the wallet's busy flag on drop
pub(crate) struct MutationGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        lock(self.busy).remove(&self.name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type AccountLocks = HashMap<(String, Address), Arc<Mutex<()>>>;

/// Keystore for named, password-protected wallets
pub struct WalletVault {
    store: WalletStore,
    network: Network,
    kdf: KdfParams,
    busy: Mutex<HashSet<String>>,
    account_locks: Mutex<AccountLocks>,
}

impl WalletVault {
    pub fn new(config: VaultConfig) -> Result<Self, VaultError> {
        Ok(Self {
            store: WalletStore::new(config.data_dir)?,
            network: config.network,
            kdf: config.kdf,
            busy: Mutex::new(HashSet::new()),
            account_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn list_wallets(&self) -> Result<Vec<String>, VaultError> {
        self.store.list()
    }

    /// Mark a wallet as being mutated, failing if it already is
    pub(crate) fn begin_mutation(&self, name: &str) -> Result<MutationGuard<'_>, VaultError> {
        let mut busy = lock(&self.busy);
        if !busy.insert(name.to_string()) {
            debug!("Rejected concurrent mutation of wallet '{}'", name);
            return Err(VaultError::Busy(name.to_string()));
        }
        Ok(MutationGuard {
            busy: &self.busy,
            name: name.to_string(),
        })
    }

    fn account_lock(&self, wallet: &str, address: &Address) -> Arc<Mutex<()>> {
        lock(&self.account_locks)
            .entry((wallet.to_string(), address.clone()))
            .or_default()
            .clone()
    }

    /// Derive the wallet key and check it against the password-check blob
    fn authenticate(container: &StoredContainer, password: &str) -> Result<Kek, VaultError> {
        if password.is_empty() {
            return Err(VaultError::PasswordMissing);
        }
        let body = &container.body;
        let kek = cipher::derive_key(password, &body.salt_bytes()?, &body.kdf).map_err(corrupt)?;

        match cipher::open(&kek, &body.password_check, PASSWORD_CHECK_AAD) {
            Ok(check) if check.as_slice() == PASSWORD_CHECK => Ok(kek),
            Ok(_) => Err(VaultError::Corrupt("password check mismatch".to_string())),
            Err(CipherError::Authentication) => Err(VaultError::WrongPassword),
            Err(e) => Err(corrupt(e)),
        }
    }

    fn seal_account_key(kek: &Kek, key_pair: &KeyPair, address: &Address) -> Result<cipher::SealedBox, VaultError> {
        cipher::seal(kek, &*key_pair.secret_bytes(), address.as_str().as_bytes()).map_err(corrupt)
    }

    // =========================================================================
    // Wallet lifecycle
    // =========================================================================

    pub fn create_wallet(&self, name: &str, password: &str) -> Result<WalletSummary, VaultError> {
        WalletStore::validate_name(name)?;
        if password.is_empty() {
            return Err(VaultError::PasswordMissing);
        }
        let _guard = self.begin_mutation(name)?;
        self.store.ensure_available(name)?;

        let salt = cipher::random_salt();
        let kek = cipher::derive_key(password, &salt, &self.kdf).map_err(corrupt)?;
        let password_check = cipher::seal(&kek, PASSWORD_CHECK, PASSWORD_CHECK_AAD).map_err(corrupt)?;

        let now = Utc::now();
        let container = StoredContainer::new(ContainerBody {
            version: CONTAINER_VERSION,
            name: name.to_string(),
            network: self.network,
            created_at: now,
            modified_at: now,
            salt: hex::encode(salt),
            kdf: self.kdf,
            password_check,
            accounts: Vec::new(),
        })?;
        self.store.save(&container)?;

        info!("Created wallet '{}'", name);
        Ok(WalletSummary::from_container(&container))
    }

    /// Authenticate and open a wallet
    pub fn unlock(&self, name: &str, password: &str) -> Result<DecryptedHandle, VaultError> {
        if password.is_empty() {
            return Err(VaultError::PasswordMissing);
        }
        let container = self.store.load(name)?;
        let kek = Self::authenticate(&container, password).inspect_err(|e| {
            if matches!(e, VaultError::WrongPassword) {
                warn!("Wrong password for wallet '{}'", name);
            }
        })?;

        debug!("Unlocked wallet '{}'", name);
        Ok(DecryptedHandle {
            wallet: name.to_string(),
            salt: container.body.salt.clone(),
            kek,
            summary: WalletSummary::from_container(&container),
        })
    }

    /// Decrypt one account's key for the duration of `f`
    ///
    /// The key is dropped, and erased, when `f` returns, fails or panics.
    /// Decryptions of the same account never overlap.
    pub fn with_signing_key<T, E, F>(
        &self,
        handle: &DecryptedHandle,
        address: &Address,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&SigningKey) -> Result<T, E>,
        E: From<VaultError>,
    {
        let container = match self.store.load(&handle.wallet) {
            Ok(container) => container,
            Err(VaultError::NotFound(_)) => return Err(VaultError::WalletNotOpen.into()),
            Err(e) => return Err(e.into()),
        };
        if container.body.salt != handle.salt {
            return Err(VaultError::WalletNotOpen.into());
        }
        let record = container
            .body
            .account(address)
            .ok_or_else(|| VaultError::AccountNotInWallet(address.clone()))?;

        let account_lock = self.account_lock(&handle.wallet, address);
        let _serialized = lock(&account_lock);

        let key = {
            let secret = cipher::open(
                &handle.kek,
                &record.encrypted_key,
                address.as_str().as_bytes(),
            )
            .map_err(corrupt)?;
            SigningKey::from_secret_bytes(&secret)
                .map_err(|_| VaultError::Corrupt(format!("bad key for {}", address)))?
        };
        if &key.address(container.body.network) != address {
            return Err(VaultError::Corrupt(format!("key does not match {}", address)).into());
        }

        debug!("Signing scope {} opened for {}", key.scope_id(), address);
        let result = f(&key);
        drop(key);
        result
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a generated or imported account; the first account becomes primary
    pub fn add_account(
        &self,
        name: &str,
        password: &str,
        source: AccountSource,
        label: Option<String>,
    ) -> Result<AccountSummary, VaultError> {
        let _guard = self.begin_mutation(name)?;
        let mut container = self.store.load(name)?;
        let kek = Self::authenticate(&container, password)?;

        let key_pair = match source {
            AccountSource::Generate => KeyPair::generate(),
            AccountSource::Import(secret_hex) => KeyPair::from_private_key_hex(secret_hex.trim())?,
        };
        let address = key_pair.address(container.body.network);
        if container.body.account(&address).is_some() {
            return Err(VaultError::AccountAlreadyInWallet(address));
        }

        let record = AccountRecord {
            address: address.clone(),
            label,
            public_key: Some(key_pair.public_key_hex()),
            encrypted_key: Self::seal_account_key(&kek, &key_pair, &address)?,
            primary: container.body.accounts.is_empty(),
        };
        container.body.accounts.push(record);
        container.reseal()?;
        self.store.save(&container)?;

        info!("Added account {} to wallet '{}'", address, name);
        WalletSummary::from_container(&container)
            .accounts
            .into_iter()
            .find(|a| a.address == address)
            .ok_or(VaultError::AccountNotInWallet(address))
    }

    /// Remove a non-primary account with a zero cached balance
    pub fn remove_account(&self, name: &str, password: &str, address: &Address) -> Result<(), VaultError> {
        let _guard = self.begin_mutation(name)?;
        let mut container = self.store.load(name)?;
        Self::authenticate(&container, password)?;

        let record = container
            .body
            .account(address)
            .ok_or_else(|| VaultError::AccountNotInWallet(address.clone()))?;
        if record.primary {
            return Err(VaultError::AccountNotRemovable {
                address: address.clone(),
                reason: RemovalBlock::Primary,
            });
        }
        if !container.cached_balance(address).is_zero() {
            return Err(VaultError::AccountNotRemovable {
                address: address.clone(),
                reason: RemovalBlock::NonZeroBalance,
            });
        }

        container.body.accounts.retain(|a| &a.address != address);
        container.snapshots.remove(address);
        container.reseal()?;
        self.store.save(&container)?;

        info!("Removed account {} from wallet '{}'", address, name);
        Ok(())
    }

    pub fn set_primary(&self, name: &str, password: &str, address: &Address) -> Result<(), VaultError> {
        let _guard = self.begin_mutation(name)?;
        let mut container = self.store.load(name)?;
        Self::authenticate(&container, password)?;

        if container.body.account(address).is_none() {
            return Err(VaultError::AccountNotInWallet(address.clone()));
        }
        for record in &mut container.body.accounts {
            record.primary = &record.address == address;
        }
        container.reseal()?;
        self.store.save(&container)?;

        info!("Primary account of wallet '{}' is now {}", name, address);
        Ok(())
    }

    pub fn set_label(
        &self,
        name: &str,
        password: &str,
        address: &Address,
        label: Option<String>,
    ) -> Result<(), VaultError> {
        let _guard = self.begin_mutation(name)?;
        let mut container = self.store.load(name)?;
        Self::authenticate(&container, password)?;

        let record = container
            .body
            .accounts
            .iter_mut()
            .find(|a| &a.address == address)
            .ok_or_else(|| VaultError::AccountNotInWallet(address.clone()))?;
        record.label = label;
        container.reseal()?;
        self.store.save(&container)
    }

    pub fn rename_wallet(&self, name: &str, new_name: &str, password: &str) -> Result<(), VaultError> {
        WalletStore::validate_name(new_name)?;
        let _guard = self.begin_mutation(name)?;
        let _new_guard = self.begin_mutation(new_name)?;
        let mut container = self.store.load(name)?;
        Self::authenticate(&container, password)?;
        self.store.ensure_available(new_name)?;

        container.body.name = new_name.to_string();
        container.reseal()?;
        self.store.save(&container)?;
        self.store.remove(name)?;

        info!("Renamed wallet '{}' to '{}'", name, new_name);
        Ok(())
    }

    /// Re-encrypt every account under a new password and a fresh salt
    pub fn change_password(&self, name: &str, old_password: &str, new_password: &str) -> Result<(), VaultError> {
        if new_password.is_empty() {
            return Err(VaultError::PasswordMissing);
        }
        let _guard = self.begin_mutation(name)?;
        let mut container = self.store.load(name)?;
        let old_kek = Self::authenticate(&container, old_password)?;

        let salt = cipher::random_salt();
        let new_kek = cipher::derive_key(new_password, &salt, &self.kdf).map_err(corrupt)?;

        for record in &mut container.body.accounts {
            let aad = record.address.as_str().as_bytes().to_vec();
            let secret = cipher::open(&old_kek, &record.encrypted_key, &aad).map_err(corrupt)?;
            record.encrypted_key = cipher::seal(&new_kek, &secret, &aad).map_err(corrupt)?;
        }
        container.body.salt = hex::encode(salt);
        container.body.kdf = self.kdf;
        container.body.password_check =
            cipher::seal(&new_kek, PASSWORD_CHECK, PASSWORD_CHECK_AAD).map_err(corrupt)?;
        container.reseal()?;
        self.store.save(&container)?;

        info!("Changed password of wallet '{}'", name);
        Ok(())
    }

    /// Update the cached balance and importance of an account
    pub fn refresh_account_snapshot(
        &self,
        name: &str,
        address: &Address,
        balance: Amount,
        importance: f64,
    ) -> Result<(), VaultError> {
        let _guard = self.begin_mutation(name)?;
        let mut container = self.store.load(name)?;
        if container.body.account(address).is_none() {
            return Err(VaultError::AccountNotInWallet(address.clone()));
        }
        container.snapshots.insert(
            address.clone(),
            AccountSnapshot {
                balance,
                importance,
                refreshed_at: Utc::now(),
            },
        );
        self.store.save(&container)?;
        debug!("Refreshed snapshot of {} in '{}'", address, name);
        Ok(())
    }

    /// Public view of a wallet without authenticating
    pub fn summary(&self, name: &str) -> Result<WalletSummary, VaultError> {
        Ok(WalletSummary::from_container(&self.store.load(name)?))
    }
}
