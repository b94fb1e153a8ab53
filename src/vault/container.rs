//! On-disk wallet containers
//!
//! One JSON file per wallet, `<name>.wlt`, inside the storage directory.
//! The body carries everything needed to authenticate and decrypt; a
//! SHA-256 digest over the body detects corruption. Cached balance
//! snapshots sit outside the digest since they are refreshed without the
//! password.

use super::cipher::{KdfParams, SealedBox, SALT_LEN};
use super::vault::VaultError;
use crate::core::Amount;
use crate::crypto::{sha256_hex, Address, Network};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

// =============================================================================
// Constants
// =============================================================================

pub const CONTAINER_VERSION: u32 = 1;

pub const CONTAINER_EXTENSION: &str = "wlt";

pub const MAX_WALLET_NAME_LEN: usize = 64;

// =============================================================================
// Records
// =============================================================================

/// One custodied account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub address: Address,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    /// Secret key sealed under the wallet key, bound to `address`
    pub encrypted_key: SealedBox,
    pub primary: bool,
}

/// Balance and importance as last reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Amount,
    pub importance: f64,
    pub refreshed_at: DateTime<Utc>,
}

/// Authenticated part of the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBody {
    pub version: u32,
    pub name: String,
    pub network: Network,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Hex-encoded Argon2 salt
    pub salt: String,
    pub kdf: KdfParams,
    /// Known plaintext sealed under the wallet key
    pub password_check: SealedBox,
    pub accounts: Vec<AccountRecord>,
}

impl ContainerBody {
    pub fn digest(&self) -> Result<String, VaultError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| VaultError::Corrupt(format!("cannot encode body: {}", e)))?;
        Ok(sha256_hex(&bytes))
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>, VaultError> {
        let salt = hex::decode(&self.salt)
            .map_err(|_| VaultError::Corrupt("salt is not hex".to_string()))?;
        if salt.len() != SALT_LEN {
            return Err(VaultError::Corrupt(format!(
                "salt has {} bytes, expected {}",
                salt.len(),
                SALT_LEN
            )));
        }
        Ok(salt)
    }

    pub fn account(&self, address: &Address) -> Option<&AccountRecord> {
        self.accounts.iter().find(|a| &a.address == address)
    }

    /// Structural invariants every loaded container must satisfy
    fn check_structure(&self) -> Result<(), VaultError> {
        if self.version != CONTAINER_VERSION {
            return Err(VaultError::Corrupt(format!(
                "unsupported container version {}",
                self.version
            )));
        }
        self.salt_bytes()?;

        let mut seen = BTreeSet::new();
        for record in &self.accounts {
            if record.address.network() != Some(self.network) {
                return Err(VaultError::Corrupt(format!(
                    "account {} belongs to another network",
                    record.address
                )));
            }
            if !seen.insert(&record.address) {
                return Err(VaultError::Corrupt(format!(
                    "account {} stored twice",
                    record.address
                )));
            }
        }

        let primaries = self.accounts.iter().filter(|a| a.primary).count();
        if !self.accounts.is_empty() && primaries != 1 {
            return Err(VaultError::Corrupt(format!(
                "{} primary accounts",
                primaries
            )));
        }
        Ok(())
    }
}

/// The file as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredContainer {
    pub body: ContainerBody,
    /// Hex SHA-256 of the serialized body
    pub integrity: String,
    #[serde(default)]
    pub snapshots: BTreeMap<Address, AccountSnapshot>,
}

impl StoredContainer {
    pub fn new(body: ContainerBody) -> Result<Self, VaultError> {
        let integrity = body.digest()?;
        Ok(Self {
            body,
            integrity,
            snapshots: BTreeMap::new(),
        })
    }

    /// Recompute the digest after mutating the body
    pub fn reseal(&mut self) -> Result<(), VaultError> {
        self.body.modified_at = Utc::now();
        self.integrity = self.body.digest()?;
        Ok(())
    }

    fn verify(&self, expected_name: &str) -> Result<(), VaultError> {
        if self.body.digest()? != self.integrity {
            return Err(VaultError::Corrupt("integrity digest mismatch".to_string()));
        }
        if self.body.name != expected_name {
            return Err(VaultError::Corrupt(format!(
                "container holds wallet '{}'",
                self.body.name
            )));
        }
        self.body.check_structure()
    }

    pub fn cached_balance(&self, address: &Address) -> Amount {
        self.snapshots
            .get(address)
            .map(|s| s.balance)
            .unwrap_or(Amount::ZERO)
    }
}

// =============================================================================
// Wallet Store
// =============================================================================

/// Directory holding wallet containers
#[derive(Debug, Clone)]
pub struct WalletStore {
    dir: PathBuf,
}

impl WalletStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, CONTAINER_EXTENSION))
    }

    fn temp_path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!(".{}.{}.tmp", name, CONTAINER_EXTENSION))
    }

    /// Names must be usable as a single path component
    pub fn validate_name(name: &str) -> Result<(), VaultError> {
        let valid = !name.is_empty()
            && name.chars().count() <= MAX_WALLET_NAME_LEN
            && !name.starts_with('.')
            && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
        if valid {
            Ok(())
        } else {
            Err(VaultError::InvalidName(name.to_string()))
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    /// Whether an unrelated directory entry already uses the bare name
    pub fn entry_exists(&self, name: &str) -> bool {
        self.dir.join(name).exists()
    }

    /// Fail when `name` is taken by a wallet or another entry
    pub fn ensure_available(&self, name: &str) -> Result<(), VaultError> {
        if self.exists(name) {
            return Err(VaultError::NameExists(name.to_string()));
        }
        if self.entry_exists(name) {
            return Err(VaultError::NameCollidesWithContainer(name.to_string()));
        }
        Ok(())
    }

    /// Sorted wallet names found in the directory
    pub fn list(&self) -> Result<Vec<String>, VaultError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(CONTAINER_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load and verify a container
    pub fn load(&self, name: &str) -> Result<StoredContainer, VaultError> {
        let path = self.path_for(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let container: StoredContainer = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::Corrupt(format!("unreadable container: {}", e)))?;
        container.verify(name)?;
        Ok(container)
    }

    /// Write to a temp file, then atomically rename over the container
    pub fn save(&self, container: &StoredContainer) -> Result<(), VaultError> {
        let name = &container.body.name;
        let path = self.path_for(name);
        let temp_path = self.temp_path_for(name);

        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, container)
            .map_err(|e| VaultError::Corrupt(format!("cannot encode container: {}", e)))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), VaultError> {
        fs::remove_file(self.path_for(name))?;
        Ok(())
    }
}
