//! Fixed-point money arithmetic
//!
//! Every amount in the settlement engine is an integer count of minor
//! currency units. Binary floating point never touches a balance; decimal
//! strings from client input or provider payloads are parsed through
//! `rust_decimal` at the boundary and converted exactly or rejected.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type MoneyResult<T> = Result<T, MoneyError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("amount overflow")]
    Overflow,

    #[error("negative result from disallowed operation")]
    NegativeResult,
}

/// Number of decimal places carried by the settlement currency.
///
/// VND has no minor unit, so one minor unit equals one đồng. The type still
/// works in minor units throughout so a two-decimal currency only needs a
/// different scale here.
pub const CURRENCY_SCALE: u32 = 0;

/// An exact, non-negative amount in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    minor: i64,
}

impl Money {
    pub const ZERO: Money = Money { minor: 0 };

    /// Construct from a minor-unit count. Negative amounts are rejected.
    pub fn from_minor(minor: i64) -> MoneyResult<Self> {
        if minor < 0 {
            return Err(MoneyError::InvalidAmount {
                reason: format!("negative amount {minor}"),
            });
        }
        Ok(Self { minor })
    }

    /// Parse a decimal string (`"100000"`, `"100000.00"`) into minor units.
    ///
    /// Fractional digits beyond the currency scale are rejected rather than
    /// rounded; a provider reporting half a đồng is a reconciliation
    /// problem, not something to paper over.
    pub fn parse(input: &str) -> MoneyResult<Self> {
        let decimal = Decimal::from_str(input.trim()).map_err(|e| MoneyError::InvalidAmount {
            reason: format!("unparseable decimal {input:?}: {e}"),
        })?;
        if decimal.is_sign_negative() {
            return Err(MoneyError::InvalidAmount {
                reason: format!("negative amount {input:?}"),
            });
        }
        let scaled = decimal
            .checked_mul(Decimal::from(10i64.pow(CURRENCY_SCALE)))
            .ok_or(MoneyError::Overflow)?;
        if scaled.fract() != Decimal::ZERO {
            return Err(MoneyError::InvalidAmount {
                reason: format!("sub-minor-unit precision in {input:?}"),
            });
        }
        let minor = scaled.trunc().to_i64().ok_or(MoneyError::Overflow)?;
        Self::from_minor(minor)
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn checked_add(self, other: Money) -> MoneyResult<Money> {
        self.minor
            .checked_add(other.minor)
            .map(|minor| Money { minor })
            .ok_or(MoneyError::Overflow)
    }

    /// Subtraction that fails with `NegativeResult` instead of producing a
    /// negative total (e.g. a discount larger than the order).
    pub fn checked_sub(self, other: Money) -> MoneyResult<Money> {
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or(MoneyError::Overflow)?;
        if minor < 0 {
            return Err(MoneyError::NegativeResult);
        }
        Ok(Money { minor })
    }

    pub fn multiply(self, quantity: u32) -> MoneyResult<Money> {
        self.minor
            .checked_mul(i64::from(quantity))
            .map(|minor| Money { minor })
            .ok_or(MoneyError::Overflow)
    }

    /// Basis-point percentage, truncating toward zero minor units.
    ///
    /// `Money::from_minor(100_000).percentage(100)` is 1% = 1000.
    pub fn percentage(self, bps: u32) -> MoneyResult<Money> {
        let product = i128::from(self.minor) * i128::from(bps);
        let minor = i64::try_from(product / 10_000).map_err(|_| MoneyError::Overflow)?;
        Ok(Money { minor })
    }

    /// Split this amount proportionally over `weights`.
    ///
    /// Each share truncates toward zero; the truncation remainder is folded
    /// into the last share so the parts always sum back to the whole.
    pub fn allocate(self, weights: &[i64]) -> MoneyResult<Vec<Money>> {
        if weights.is_empty() || weights.iter().any(|w| *w < 0) {
            return Err(MoneyError::InvalidAmount {
                reason: "allocation weights must be non-empty and non-negative".to_string(),
            });
        }
        let total_weight: i64 = weights.iter().sum();
        if total_weight == 0 {
            return Err(MoneyError::InvalidAmount {
                reason: "allocation weights sum to zero".to_string(),
            });
        }

        let mut shares = Vec::with_capacity(weights.len());
        let mut distributed: i64 = 0;
        for weight in weights {
            let share = (i128::from(self.minor) * i128::from(*weight))
                / i128::from(total_weight);
            let share = i64::try_from(share).map_err(|_| MoneyError::Overflow)?;
            shares.push(Money { minor: share });
            distributed += share;
        }
        // Remainder from truncation lands on the last line item.
        let remainder = self.minor - distributed;
        if let Some(last) = shares.last_mut() {
            last.minor += remainder;
        }
        Ok(shares)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_integral_decimal_strings() {
        assert_eq!(Money::parse("100000").unwrap().minor(), 100_000);
        assert_eq!(Money::parse("100000.00").unwrap().minor(), 100_000);
        assert_eq!(Money::parse(" 42 ").unwrap().minor(), 42);
    }

    #[test]
    fn parse_rejects_negative_and_fractional() {
        assert!(matches!(
            Money::parse("-5"),
            Err(MoneyError::InvalidAmount { .. })
        ));
        assert!(matches!(
            Money::parse("10.5"),
            Err(MoneyError::InvalidAmount { .. })
        ));
        assert!(Money::parse("not-a-number").is_err());
    }

    #[test]
    fn subtraction_never_goes_negative() {
        let total = Money::from_minor(1_000).unwrap();
        let discount = Money::from_minor(1_500).unwrap();
        assert_eq!(total.checked_sub(discount), Err(MoneyError::NegativeResult));
        assert_eq!(
            total.checked_sub(Money::from_minor(400).unwrap()).unwrap(),
            Money::from_minor(600).unwrap()
        );
    }

    #[test]
    fn percentage_truncates_toward_zero() {
        let amount = Money::from_minor(100_000).unwrap();
        // 1% of 100000
        assert_eq!(amount.percentage(100).unwrap().minor(), 1_000);
        // 0.15% of 999 = 1.4985 -> 1
        let odd = Money::from_minor(999).unwrap();
        assert_eq!(odd.percentage(15).unwrap().minor(), 1);
    }

    #[test]
    fn allocation_conserves_every_minor_unit() {
        let total = Money::from_minor(100).unwrap();
        let shares = total.allocate(&[1, 1, 1]).unwrap();
        let sum: i64 = shares.iter().map(|s| s.minor()).sum();
        assert_eq!(sum, 100);
        // 33 + 33 + (33 + remainder 1)
        assert_eq!(shares[0].minor(), 33);
        assert_eq!(shares[1].minor(), 33);
        assert_eq!(shares[2].minor(), 34);
    }

    #[test]
    fn allocation_rejects_degenerate_weights() {
        let total = Money::from_minor(100).unwrap();
        assert!(total.allocate(&[]).is_err());
        assert!(total.allocate(&[0, 0]).is_err());
        assert!(total.allocate(&[-1, 2]).is_err());
    }
}
