//! Transaction builder
//!
//! Validates requests, computes fees and signs through the vault's scoped
//! signing call. No network I/O happens here.
//!
//! Transactions for a registered multisig account come back unsigned and
//! tagged multisig-originated; they only reach the node wrapped in a
//! cosignature built with [`TransactionBuilder::cosign`].

use super::amount::Amount;
use super::fee::{minimum_fee, multisig_fees, validate_fee, validate_multisig_fees, FeeClass};
use super::transaction::{HarvestingMode, Message, Transaction, TransactionError, TransactionKind};
use super::validation::{
    validate_deadline, validate_message_size, validate_recipient, FeeTarget, ValidationError,
};
use crate::crypto::{
    encrypt_message, public_key_from_hex, sealed_len, Address, KeyError, MessageCryptoError,
    Network, SigningKey,
};
use crate::fault::{Fault, FaultCode};
use crate::multisig::{MultisigCoordinator, MultisigError};
use crate::vault::{DecryptedHandle, VaultError, WalletVault};
use chrono::{DateTime, Utc};
use log::debug;
use secp256k1::PublicKey;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Multisig(#[from] MultisigError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("Signing failed: {0}")]
    Signing(#[from] KeyError),
    #[error(transparent)]
    MessageCrypto(#[from] MessageCryptoError),
    #[error("Public key of {0} is unknown; cannot encrypt the message")]
    RecipientKeyUnknown(Address),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Encrypted messages cannot be sent from multisig account {0}")]
    EncryptedFromMultisig(Address),
    #[error("Wallet belongs to {wallet}, builder is for {builder}")]
    NetworkMismatch { wallet: Network, builder: Network },
    #[error("Inner transaction hash {0} does not match its payload")]
    InnerHashMismatch(String),
}

impl Fault for BuildError {
    fn code(&self) -> FaultCode {
        match self {
            BuildError::Validation(e) => e.code(),
            BuildError::Vault(e) => e.code(),
            BuildError::Multisig(e) => e.code(),
            BuildError::Transaction(e) => e.code(),
            BuildError::Signing(_) => FaultCode::Unexpected,
            BuildError::MessageCrypto(_) => FaultCode::Unexpected,
            BuildError::RecipientKeyUnknown(_) => FaultCode::PublicKeyUnknown,
            BuildError::InvalidPublicKey(_)
            | BuildError::EncryptedFromMultisig(_)
            | BuildError::NetworkMismatch { .. }
            | BuildError::InnerHashMismatch(_) => FaultCode::InvalidParameter,
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Message to attach to a transfer
#[derive(Debug, Clone)]
pub enum MessageRequest {
    Plain(Vec<u8>),
    /// Encrypted to the recipient; needs the recipient's public key
    Encrypted {
        plaintext: Vec<u8>,
        recipient_public_key: Option<String>,
    },
}

impl MessageRequest {
    /// Payload size once built
    fn payload_len(&self) -> usize {
        match self {
            MessageRequest::Plain(bytes) => bytes.len(),
            MessageRequest::Encrypted { plaintext, .. } => sealed_len(plaintext.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender: Address,
    /// Unvalidated recipient address
    pub recipient: String,
    pub amount: Amount,
    pub message: Option<MessageRequest>,
    /// Defaults to the minimum fee
    pub fee: Option<Amount>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ImportanceTransferRequest {
    pub sender: Address,
    pub remote_public_key: String,
    pub mode: HarvestingMode,
    pub fee: Option<Amount>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub account: Address,
    /// Unvalidated cosignatory addresses
    pub cosignatories: Vec<String>,
    pub fee: Option<Amount>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CosignRequest {
    pub cosignatory: Address,
    pub inner: Transaction,
    pub fee: Option<Amount>,
    pub deadline: DateTime<Utc>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builds and signs transactions for one network
pub struct TransactionBuilder<'a> {
    vault: &'a WalletVault,
    multisig: &'a MultisigCoordinator,
    network: Network,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(vault: &'a WalletVault, multisig: &'a MultisigCoordinator, network: Network) -> Self {
        Self {
            vault,
            multisig,
            network,
        }
    }

    fn resolve_fee(provided: Option<Amount>, minimum: Amount) -> Result<Amount, BuildError> {
        match provided {
            Some(fee) => {
                validate_fee(FeeTarget::Transaction, fee, minimum)?;
                Ok(fee)
            }
            None => Ok(minimum),
        }
    }

    fn check_network(&self, handle: &DecryptedHandle) -> Result<(), BuildError> {
        if handle.network() != self.network {
            return Err(BuildError::NetworkMismatch {
                wallet: handle.network(),
                builder: self.network,
            });
        }
        Ok(())
    }

    /// Assemble and sign with a key lent by the vault
    fn sign(
        &self,
        key: &SigningKey,
        kind: TransactionKind,
        fee: Amount,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Transaction, BuildError> {
        let mut tx = Transaction::unsigned(
            self.network,
            kind,
            key.public_key_hex(),
            key.address(self.network),
            fee,
            now,
            deadline,
            false,
        )?;
        let signature = key.sign(&tx.signing_hash()?)?;
        tx.attach_signature(&signature)?;
        debug!("Built {:?} transaction {}", tx.tx_type(), tx.hash);
        Ok(tx)
    }

    /// Unsigned inner transaction for a multisig sender
    fn multisig_inner(
        &self,
        sender: &Address,
        kind: TransactionKind,
        fee: Amount,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Transaction>, BuildError> {
        let Some(account) = self.multisig.account(sender) else {
            return Ok(None);
        };
        let tx = Transaction::unsigned(
            self.network,
            kind,
            account.public_key,
            sender.clone(),
            fee,
            now,
            deadline,
            true,
        )?;
        debug!("Built multisig-originated transaction {} for {}", tx.hash, sender);
        Ok(Some(tx))
    }

    pub fn transfer(
        &self,
        handle: &DecryptedHandle,
        request: TransferRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction, BuildError> {
        let recipient = validate_recipient(&request.recipient, self.network)?;
        validate_deadline(request.deadline, now)?;
        let message_size = request.message.as_ref().map_or(0, |m| m.payload_len());
        validate_message_size(message_size)?;
        let fee = Self::resolve_fee(
            request.fee,
            minimum_fee(FeeClass::Transfer, request.amount, message_size),
        )?;

        if self.multisig.is_multisig(&request.sender) {
            let message = match request.message {
                None => None,
                Some(MessageRequest::Plain(bytes)) => Some(Message::Plain(bytes)),
                Some(MessageRequest::Encrypted { .. }) => {
                    return Err(BuildError::EncryptedFromMultisig(request.sender))
                }
            };
            let kind = TransactionKind::Transfer {
                recipient,
                amount: request.amount,
                message,
            };
            if let Some(inner) =
                self.multisig_inner(&request.sender, kind, fee, now, request.deadline)?
            {
                return Ok(inner);
            }
            return Err(MultisigError::UnknownMultisigAccount(request.sender).into());
        }

        self.check_network(handle)?;
        let recipient_key = match &request.message {
            Some(MessageRequest::Encrypted {
                recipient_public_key,
                ..
            }) => Some(self.recipient_key(&recipient, recipient_public_key.as_deref())?),
            _ => None,
        };

        self.vault
            .with_signing_key(handle, &request.sender, |key| {
                let message = match request.message {
                    None => None,
                    Some(MessageRequest::Plain(bytes)) => Some(Message::Plain(bytes)),
                    Some(MessageRequest::Encrypted { plaintext, .. }) => {
                        let recipient_key = recipient_key
                            .as_ref()
                            .ok_or_else(|| BuildError::RecipientKeyUnknown(recipient.clone()))?;
                        Some(Message::Encrypted(encrypt_message(
                            key,
                            recipient_key,
                            &plaintext,
                        )?))
                    }
                };
                let kind = TransactionKind::Transfer {
                    recipient: recipient.clone(),
                    amount: request.amount,
                    message,
                };
                self.sign(key, kind, fee, now, request.deadline)
            })
    }

    /// Parse the recipient's key and check it belongs to the recipient
    fn recipient_key(
        &self,
        recipient: &Address,
        public_key: Option<&str>,
    ) -> Result<PublicKey, BuildError> {
        let hex_key = public_key.ok_or_else(|| BuildError::RecipientKeyUnknown(recipient.clone()))?;
        let key = public_key_from_hex(hex_key)
            .map_err(|_| BuildError::InvalidPublicKey(hex_key.to_string()))?;
        if &Address::from_public_key(&key, self.network) != recipient {
            return Err(BuildError::InvalidPublicKey(hex_key.to_string()));
        }
        Ok(key)
    }

    pub fn importance_transfer(
        &self,
        handle: &DecryptedHandle,
        request: ImportanceTransferRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction, BuildError> {
        public_key_from_hex(&request.remote_public_key)
            .map_err(|_| BuildError::InvalidPublicKey(request.remote_public_key.clone()))?;
        validate_deadline(request.deadline, now)?;
        let fee = Self::resolve_fee(
            request.fee,
            minimum_fee(FeeClass::ImportanceTransfer, Amount::ZERO, 0),
        )?;
        let kind = TransactionKind::ImportanceTransfer {
            mode: request.mode,
            remote_public_key: request.remote_public_key,
        };

        if let Some(inner) =
            self.multisig_inner(&request.sender, kind.clone(), fee, now, request.deadline)?
        {
            return Ok(inner);
        }
        self.check_network(handle)?;
        self.vault.with_signing_key(handle, &request.sender, |key| {
            self.sign(key, kind, fee, now, request.deadline)
        })
    }

    /// Convert an account to multisig
    ///
    /// Self-inclusion, nesting, duplicates and cycles are rejected before
    /// the key is touched.
    pub fn multisig_conversion(
        &self,
        handle: &DecryptedHandle,
        request: ConversionRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction, BuildError> {
        let cosignatories = request
            .cosignatories
            .iter()
            .map(|c| validate_recipient(c, self.network))
            .collect::<Result<Vec<_>, _>>()?;
        self.multisig
            .validate_conversion(&request.account, &cosignatories)?;
        validate_deadline(request.deadline, now)?;

        let kind = TransactionKind::MultisigConversion { cosignatories };
        let fee = Self::resolve_fee(request.fee, minimum_fee(kind.fee_class(), Amount::ZERO, 0))?;

        self.check_network(handle)?;
        self.vault.with_signing_key(handle, &request.account, |key| {
            self.sign(key, kind, fee, now, request.deadline)
        })
    }

    /// Wrap a multisig-originated inner transaction in a cosignature
    pub fn cosign(
        &self,
        handle: &DecryptedHandle,
        request: CosignRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction, BuildError> {
        let inner = request.inner;
        if !inner.multisig_originated {
            return Err(MultisigError::NotMultisigOriginated.into());
        }
        if inner.calculate_hash()? != inner.hash {
            return Err(BuildError::InnerHashMismatch(inner.hash));
        }
        self.multisig.authorize(&inner.sender, &request.cosignatory)?;
        if inner.is_expired(now) {
            return Err(ValidationError::DeadlineTooEarly.into());
        }
        validate_deadline(request.deadline, now)?;

        let required = multisig_fees(&inner.kind);
        let cosignature_fee = request.fee.unwrap_or(required.cosignature_fee);
        validate_multisig_fees(inner.fee, cosignature_fee, &required)?;

        self.check_network(handle)?;
        let kind = TransactionKind::MultisigSignature {
            multisig_account: inner.sender.clone(),
            inner: Box::new(inner),
        };
        self.vault.with_signing_key(handle, &request.cosignatory, |key| {
            self.sign(key, kind, cosignature_fee, now, request.deadline)
        })
    }
}
