//! Transaction model
//!
//! Account-based transactions with four variants:
//! - Transfers with an optional plain or encrypted message
//! - Importance transfers (delegated harvesting activation)
//! - Multisig conversions
//! - Multisig signatures wrapping an inner transaction
//!
//! The hash is SHA-256 over the canonical payload followed by the signature,
//! so an unsigned transaction has a stable hash of its own.

use super::amount::Amount;
use super::fee::FeeClass;
use crate::crypto::{
    public_key_from_hex, sha256, sha256_parts, verify_signature, Address, KeyError, Network,
};
use crate::fault::{Fault, FaultCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Could not encode transaction: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    Crypto(#[from] KeyError),
    #[error("Transaction is not signed")]
    Unsigned,
}

impl Fault for TransactionError {
    fn code(&self) -> FaultCode {
        match self {
            TransactionError::Encoding(_) => FaultCode::Unexpected,
            TransactionError::Crypto(_) | TransactionError::Unsigned => {
                FaultCode::InvalidSignature
            }
        }
    }
}

// =============================================================================
// Payload Types
// =============================================================================

/// Transaction type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Transfer,
    ImportanceTransfer,
    MultisigConversion,
    MultisigSignature,
}

/// Message attached to a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Plain(#[serde(with = "hex_bytes")] Vec<u8>),
    /// Sealed to the recipient's public key
    Encrypted(#[serde(with = "hex_bytes")] Vec<u8>),
}

impl Message {
    /// Size of the payload as sent
    pub fn payload_len(&self) -> usize {
        match self {
            Message::Plain(bytes) | Message::Encrypted(bytes) => bytes.len(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Message::Encrypted(_))
    }
}

/// Delegated harvesting direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestingMode {
    Activate,
    Deactivate,
}

/// Variant-specific body of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer {
        recipient: Address,
        amount: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },
    ImportanceTransfer {
        mode: HarvestingMode,
        /// Public key of the remote harvesting account
        remote_public_key: String,
    },
    MultisigConversion {
        cosignatories: Vec<Address>,
    },
    MultisigSignature {
        /// Account the inner transaction is executed for
        multisig_account: Address,
        inner: Box<Transaction>,
    },
}

impl TransactionKind {
    pub fn tx_type(&self) -> TransactionType {
        match self {
            TransactionKind::Transfer { .. } => TransactionType::Transfer,
            TransactionKind::ImportanceTransfer { .. } => TransactionType::ImportanceTransfer,
            TransactionKind::MultisigConversion { .. } => TransactionType::MultisigConversion,
            TransactionKind::MultisigSignature { .. } => TransactionType::MultisigSignature,
        }
    }

    pub fn fee_class(&self) -> FeeClass {
        match self {
            TransactionKind::Transfer { .. } => FeeClass::Transfer,
            TransactionKind::ImportanceTransfer { .. } => FeeClass::ImportanceTransfer,
            TransactionKind::MultisigConversion { cosignatories } => {
                FeeClass::MultisigConversion {
                    modifications: cosignatories.len(),
                }
            }
            TransactionKind::MultisigSignature { .. } => FeeClass::MultisigSignature,
        }
    }

    /// Transferred amount; zero for non-transfers
    pub fn amount(&self) -> Amount {
        match self {
            TransactionKind::Transfer { amount, .. } => *amount,
            _ => Amount::ZERO,
        }
    }

    pub fn message_size(&self) -> usize {
        match self {
            TransactionKind::Transfer {
                message: Some(message),
                ..
            } => message.payload_len(),
            _ => 0,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A transaction, signed or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub network: Network,
    #[serde(flatten)]
    pub kind: TransactionKind,
    /// Hex-encoded compressed public key of the signer
    pub signer_public_key: String,
    pub sender: Address,
    pub fee: Amount,
    pub timestamp: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Hex-encoded compact ECDSA signature
    #[serde(default)]
    pub signature: Option<String>,
    pub hash: String,
    /// Built for a multisig account; only valid inside a cosignature
    #[serde(default)]
    pub multisig_originated: bool,
}

/// Fields covered by the signature, in canonical order
#[derive(Serialize)]
struct SigningPayload<'a> {
    network: Network,
    kind: &'a TransactionKind,
    signer: &'a str,
    sender: &'a Address,
    fee: Amount,
    timestamp: i64,
    deadline: i64,
    multisig_originated: bool,
}

impl Transaction {
    /// Create an unsigned transaction and compute its hash
    #[allow(clippy::too_many_arguments)]
    pub fn unsigned(
        network: Network,
        kind: TransactionKind,
        signer_public_key: String,
        sender: Address,
        fee: Amount,
        timestamp: DateTime<Utc>,
        deadline: DateTime<Utc>,
        multisig_originated: bool,
    ) -> Result<Self, TransactionError> {
        let mut tx = Self {
            network,
            kind,
            signer_public_key,
            sender,
            fee,
            timestamp,
            deadline,
            signature: None,
            hash: String::new(),
            multisig_originated,
        };
        tx.hash = tx.calculate_hash()?;
        Ok(tx)
    }

    pub fn tx_type(&self) -> TransactionType {
        self.kind.tx_type()
    }

    /// Canonical bytes covered by the signature
    pub fn signing_payload(&self) -> Result<Vec<u8>, TransactionError> {
        let payload = SigningPayload {
            network: self.network,
            kind: &self.kind,
            signer: &self.signer_public_key,
            sender: &self.sender,
            fee: self.fee,
            timestamp: self.timestamp.timestamp_millis(),
            deadline: self.deadline.timestamp_millis(),
            multisig_originated: self.multisig_originated,
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Digest that gets signed
    pub fn signing_hash(&self) -> Result<Vec<u8>, TransactionError> {
        Ok(sha256(&self.signing_payload()?))
    }

    /// SHA-256 over payload then signature
    pub fn calculate_hash(&self) -> Result<String, TransactionError> {
        let payload = self.signing_payload()?;
        let signature = match &self.signature {
            Some(sig) => hex::decode(sig).map_err(|_| KeyError::InvalidSignature)?,
            None => Vec::new(),
        };
        Ok(hex::encode(sha256_parts(&[&payload, &signature])))
    }

    /// Attach a signature and recompute the hash
    pub fn attach_signature(&mut self, signature: &[u8]) -> Result<(), TransactionError> {
        self.signature = Some(hex::encode(signature));
        self.hash = self.calculate_hash()?;
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Check the signature against the signer key and the hash against the
    /// payload
    pub fn verify(&self) -> Result<bool, TransactionError> {
        let signature = self.signature.as_ref().ok_or(TransactionError::Unsigned)?;
        let signature = hex::decode(signature).map_err(|_| KeyError::InvalidSignature)?;
        let public_key = public_key_from_hex(&self.signer_public_key)?;

        if Address::from_public_key(&public_key, self.network) != self.sender {
            return Ok(false);
        }
        if self.calculate_hash()? != self.hash {
            return Ok(false);
        }
        Ok(verify_signature(
            &public_key,
            &self.signing_hash()?,
            &signature,
        )?)
    }

    pub fn is_multisig_wrapper(&self) -> bool {
        matches!(self.kind, TransactionKind::MultisigSignature { .. })
    }

    /// Inner transaction of a multisig signature
    pub fn inner(&self) -> Option<&Transaction> {
        match &self.kind {
            TransactionKind::MultisigSignature { inner, .. } => Some(inner),
            _ => None,
        }
    }

    pub fn recipient(&self) -> Option<&Address> {
        match &self.kind {
            TransactionKind::Transfer { recipient, .. } => Some(recipient),
            _ => None,
        }
    }

    pub fn amount(&self) -> Amount {
        self.kind.amount()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }
}

/// Hex encoding for byte payloads
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
