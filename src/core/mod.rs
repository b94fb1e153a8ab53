//! Core transaction components
//!
//! This module contains the pure building blocks:
//! - Amounts in micro-units
//! - Transactions (transfer, importance transfer, multisig conversion and
//!   multisig signature)
//! - The minimum fee schedule
//! - Field validation (deadline, recipient, message size)
//! - The transaction builder, which signs through the vault

pub mod amount;
pub mod builder;
pub mod fee;
pub mod transaction;
pub mod validation;

pub use amount::{Amount, MICRO_PER_COIN};
pub use builder::{
    BuildError, ConversionRequest, CosignRequest, ImportanceTransferRequest, MessageRequest,
    TransactionBuilder, TransferRequest,
};
pub use fee::{
    minimum_fee, minimum_fee_for, multisig_fees, validate_fee, validate_multisig_fees, FeeClass,
    MultisigFees,
};
pub use transaction::{
    HarvestingMode, Message, Transaction, TransactionError, TransactionKind, TransactionType,
};
pub use validation::{
    validate_deadline, validate_message_size, validate_recipient, FeeTarget, ValidationError,
    MAX_DEADLINE_WINDOW_HOURS, MAX_MESSAGE_SIZE,
};
