//! Minimum fee schedule
//!
//! Fees are fixed per transaction class and computed in whole coins:
//! - Transfers pay a base fee that shrinks for larger amounts, plus a
//!   per-32-byte message fee
//! - Importance transfers and cosignatures pay a flat fee
//! - Multisig conversions pay per cosignatory modification

use super::amount::Amount;
use super::transaction::TransactionKind;
use super::validation::{FeeTarget, ValidationError};
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Base fee unit, in coins
pub const FEE_UNIT: u64 = 2;

/// Multiplier applied to flat fees
pub const FEE_MULTIPLIER: u64 = 3;

/// Transfers below this many coins pay `SMALL_TRANSFER_FEE - coins`
pub const SMALL_TRANSFER_FEE: u64 = 10;

/// Amount scale of the transfer fee curve, in coins
pub const TRANSFER_FEE_SCALE: f64 = 150_000.0;

/// Message bytes covered by one message fee unit
pub const MESSAGE_FEE_CHUNK: usize = 32;

/// Flat fee for importance transfers and cosignatures, in coins
pub const FLAT_FEE: u64 = FEE_UNIT * FEE_MULTIPLIER;

// =============================================================================
// Fee Classes
// =============================================================================

/// What a fee is being computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeClass {
    Transfer,
    ImportanceTransfer,
    MultisigConversion { modifications: usize },
    MultisigSignature,
}

/// Minimum fee for a transaction of the given class
///
/// `amount` and `message_size` only matter for transfers; a message size of
/// zero means no message.
pub fn minimum_fee(class: FeeClass, amount: Amount, message_size: usize) -> Amount {
    let coins = match class {
        FeeClass::Transfer => transfer_fee(amount) + message_fee(message_size),
        FeeClass::ImportanceTransfer | FeeClass::MultisigSignature => FLAT_FEE,
        FeeClass::MultisigConversion { modifications } => {
            FLAT_FEE * (5 + 3 * modifications as u64)
        }
    };
    Amount::from_coins(coins)
}

fn transfer_fee(amount: Amount) -> u64 {
    let coins = amount.whole_coins();
    let small = SMALL_TRANSFER_FEE.saturating_sub(coins);
    let curve = FEE_UNIT
        + ((coins as f64 / TRANSFER_FEE_SCALE).atan() * FEE_MULTIPLIER as f64 * 33.0).floor()
            as u64;
    small.max(curve)
}

fn message_fee(message_size: usize) -> u64 {
    if message_size == 0 {
        0
    } else {
        FEE_UNIT * (message_size / MESSAGE_FEE_CHUNK + 1) as u64
    }
}

/// Minimum fee for an already-shaped transaction body
pub fn minimum_fee_for(kind: &TransactionKind) -> Amount {
    minimum_fee(kind.fee_class(), kind.amount(), kind.message_size())
}

// =============================================================================
// Multisig Fees
// =============================================================================

/// The two fees of a cosigned multisig transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigFees {
    /// Paid by the multisig account for the inner transaction
    pub inner_fee: Amount,
    /// Paid by the cosignatory that signs the wrapper
    pub cosignature_fee: Amount,
}

/// Minimum fees for wrapping `inner` in a cosignature
pub fn multisig_fees(inner: &TransactionKind) -> MultisigFees {
    MultisigFees {
        inner_fee: minimum_fee_for(inner),
        cosignature_fee: minimum_fee(FeeClass::MultisigSignature, Amount::ZERO, 0),
    }
}

/// Reject when either provided fee is below its minimum
pub fn validate_multisig_fees(
    inner_fee: Amount,
    cosignature_fee: Amount,
    required: &MultisigFees,
) -> Result<(), ValidationError> {
    validate_fee(FeeTarget::Inner, inner_fee, required.inner_fee)?;
    validate_fee(
        FeeTarget::Cosignature,
        cosignature_fee,
        required.cosignature_fee,
    )
}

/// Reject a fee below `required`
pub fn validate_fee(
    target: FeeTarget,
    provided: Amount,
    required: Amount,
) -> Result<(), ValidationError> {
    if provided < required {
        return Err(ValidationError::FeeTooLow {
            target,
            provided,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(coins: u64, message_size: usize) -> u64 {
        minimum_fee(FeeClass::Transfer, Amount::from_coins(coins), message_size).whole_coins()
    }

    #[test]
    fn test_small_transfers_pay_more() {
        assert_eq!(transfer(0, 0), 10);
        assert_eq!(transfer(1, 0), 9);
        assert_eq!(transfer(8, 0), 2);
        assert_eq!(transfer(9, 0), 2);
        assert_eq!(transfer(10_000, 0), 8);
    }

    #[test]
    fn test_transfer_fee_grows_with_amount() {
        assert!(transfer(1_000_000, 0) > transfer(100_000, 0));
        assert!(transfer(100_000_000, 0) <= 2 + 156);
    }

    #[test]
    fn test_fractional_coins_are_truncated() {
        let fee = minimum_fee(FeeClass::Transfer, Amount::from_micro(9_999_999), 0);
        assert_eq!(fee, Amount::from_coins(2));
    }

    #[test]
    fn test_message_fee() {
        assert_eq!(transfer(100, 1) - transfer(100, 0), 2);
        assert_eq!(transfer(100, 31) - transfer(100, 0), 2);
        assert_eq!(transfer(100, 32) - transfer(100, 0), 4);
        assert_eq!(transfer(100, 1024) - transfer(100, 0), 66);
    }

    #[test]
    fn test_flat_fees() {
        assert_eq!(
            minimum_fee(FeeClass::ImportanceTransfer, Amount::ZERO, 0),
            Amount::from_coins(6)
        );
        assert_eq!(
            minimum_fee(FeeClass::MultisigSignature, Amount::ZERO, 0),
            Amount::from_coins(6)
        );
        assert_eq!(
            minimum_fee(
                FeeClass::MultisigConversion { modifications: 2 },
                Amount::ZERO,
                0
            ),
            Amount::from_coins(66)
        );
    }

    #[test]
    fn test_validate_multisig_fees() {
        let required = MultisigFees {
            inner_fee: Amount::from_coins(10),
            cosignature_fee: Amount::from_coins(6),
        };
        assert!(
            validate_multisig_fees(Amount::from_coins(10), Amount::from_coins(6), &required)
                .is_ok()
        );
        assert!(matches!(
            validate_multisig_fees(Amount::from_coins(9), Amount::from_coins(6), &required),
            Err(ValidationError::FeeTooLow {
                target: FeeTarget::Inner,
                ..
            })
        ));
        assert!(matches!(
            validate_multisig_fees(Amount::from_coins(10), Amount::from_coins(5), &required),
            Err(ValidationError::FeeTooLow {
                target: FeeTarget::Cosignature,
                ..
            })
        ));
    }
}
