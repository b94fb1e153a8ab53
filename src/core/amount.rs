//! Amounts in micro-units

use serde::{Deserialize, Serialize};
use std::fmt;

/// Micro-units per whole coin
pub const MICRO_PER_COIN: u64 = 1_000_000;

/// An amount of coins, stored as an integer count of micro-units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_micro(micro: u64) -> Self {
        Amount(micro)
    }

    pub const fn from_coins(coins: u64) -> Self {
        Amount(coins.saturating_mul(MICRO_PER_COIN))
    }

    pub const fn micro(self) -> u64 {
        self.0
    }

    /// Whole coins, truncating the fractional part
    pub const fn whole_coins(self) -> u64 {
        self.0 / MICRO_PER_COIN
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / MICRO_PER_COIN,
            self.0 % MICRO_PER_COIN
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_coins_truncates() {
        assert_eq!(Amount::from_micro(2_999_999).whole_coins(), 2);
        assert_eq!(Amount::from_coins(7).micro(), 7_000_000);
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_micro(1_500_000).to_string(), "1.500000");
        assert_eq!(Amount::ZERO.to_string(), "0.000000");
    }
}
