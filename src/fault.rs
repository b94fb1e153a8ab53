//! Stable fault codes
//!
//! Every error surfaced by the core maps onto a numeric [`FaultCode`] and a
//! [`FaultClass`]. Codes are stable across releases; rendering them into
//! human-readable text is the caller's job.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether retrying the failed operation can succeed without user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Node/network conditions; the same request may succeed later
    Transient,
    /// Validation, authentication or rejection; retrying unchanged is pointless
    Permanent,
}

/// Numeric fault codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum FaultCode {
    WalletNotFound = 101,
    WalletCorrupt = 103,
    WrongPassword = 104,
    PasswordMissing = 105,
    WalletNotOpen = 106,
    AccountNotInWallet = 107,
    AccountNotRemovable = 108,
    WalletNameExists = 109,
    AccountAlreadyInWallet = 110,
    WalletNameCollidesWithContainer = 111,
    WalletBusy = 114,
    InvalidWalletName = 115,
    InvalidAddress = 128,
    PublicKeyUnknown = 202,
    NodeUnavailable = 305,
    Unexpected = 306,
    InvalidParameter = 400,
    NodeNotBooted = 600,
    NodeLoading = 602,
    NodeSynchronizing = 603,
    DeadlineTooEarly = 701,
    DeadlineTooLate = 702,
    InsufficientBalance = 703,
    MessageTooLarge = 704,
    DuplicateHash = 705,
    InvalidSignature = 706,
    StaleDeadline = 707,
    TimestampTooFarInFuture = 708,
    UnknownAccount = 709,
    TransactionCacheFull = 710,
    FeeTooLow = 711,
    ImportanceTransferConflict = 730,
    RemoteAccountHasBalance = 731,
    ImportanceTransferPending = 732,
    HarvestingAlreadyActive = 733,
    HarvestingNotActive = 734,
    MultisigCannotInitiate = 740,
    NotACosignatory = 741,
    MultisigTransactionUnknown = 742,
    AlreadyCosignatory = 743,
    SelfReferentialMultisig = 744,
    CosignatoryCycle = 745,
    MultisigFinalized = 746,
}

impl FaultCode {
    /// The wire value of this code
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Default classification for the code
    pub fn class(self) -> FaultClass {
        match self {
            FaultCode::WalletBusy
            | FaultCode::NodeUnavailable
            | FaultCode::Unexpected
            | FaultCode::NodeNotBooted
            | FaultCode::NodeLoading
            | FaultCode::NodeSynchronizing
            | FaultCode::TransactionCacheFull => FaultClass::Transient,
            _ => FaultClass::Permanent,
        }
    }

    /// Whether a retry might succeed
    pub fn is_retryable(self) -> bool {
        self.class() == FaultClass::Transient
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Implemented by every component error
pub trait Fault: std::error::Error {
    fn code(&self) -> FaultCode;

    fn class(&self) -> FaultClass {
        self.code().class()
    }
}

/// Serializable fault report handed to outer layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReport {
    pub code: u16,
    pub class: FaultClass,
    pub detail: String,
}

impl FaultReport {
    pub fn from_fault<F: Fault + ?Sized>(fault: &F) -> Self {
        Self {
            code: fault.code().as_u16(),
            class: fault.class(),
            detail: fault.to_string(),
        }
    }
}
