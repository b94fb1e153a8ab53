//! Transaction field validation
//!
//! Pure checks shared by the builder and the submission path. None of them
//! touch the node.

use super::amount::Amount;
use crate::crypto::{Address, AddressError, Network};
use crate::fault::{Fault, FaultCode};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Largest allowed gap between now and a transaction deadline
pub const MAX_DEADLINE_WINDOW_HOURS: i64 = 24;

/// Largest message payload in bytes, measured after encryption
pub const MAX_MESSAGE_SIZE: usize = 1024;

// =============================================================================
// Error Types
// =============================================================================

/// Which fee a [`ValidationError::FeeTooLow`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeTarget {
    Transaction,
    Inner,
    Cosignature,
}

impl fmt::Display for FeeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeTarget::Transaction => write!(f, "Transaction"),
            FeeTarget::Inner => write!(f, "Inner transaction"),
            FeeTarget::Cosignature => write!(f, "Cosignature"),
        }
    }
}

/// Field validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Deadline must lie in the future")]
    DeadlineTooEarly,
    #[error("Deadline lies more than {MAX_DEADLINE_WINDOW_HOURS} hours ahead")]
    DeadlineTooLate,
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("Message is {size} bytes, at most {max} allowed")]
    MessageTooLarge { size: usize, max: usize },
    #[error("{target} fee {provided} is below the minimum {required}")]
    FeeTooLow {
        target: FeeTarget,
        provided: Amount,
        required: Amount,
    },
}

impl Fault for ValidationError {
    fn code(&self) -> FaultCode {
        match self {
            ValidationError::DeadlineTooEarly => FaultCode::DeadlineTooEarly,
            ValidationError::DeadlineTooLate => FaultCode::DeadlineTooLate,
            ValidationError::InvalidAddress(_) => FaultCode::InvalidAddress,
            ValidationError::MessageTooLarge { .. } => FaultCode::MessageTooLarge,
            ValidationError::FeeTooLow { .. } => FaultCode::FeeTooLow,
        }
    }
}

// =============================================================================
// Checks
// =============================================================================

/// The deadline must be after `now` and at most 24 hours after it
pub fn validate_deadline(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if deadline <= now {
        return Err(ValidationError::DeadlineTooEarly);
    }
    if deadline - now > Duration::hours(MAX_DEADLINE_WINDOW_HOURS) {
        return Err(ValidationError::DeadlineTooLate);
    }
    Ok(())
}

/// Parse and check a recipient address against the expected network
pub fn validate_recipient(address: &str, network: Network) -> Result<Address, ValidationError> {
    Ok(Address::parse(address, network)?)
}

/// `size` is the payload size as it will be sent
pub fn validate_message_size(size: usize) -> Result<(), ValidationError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(ValidationError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}
