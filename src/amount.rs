use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
///
/// Every monetary value in the ledger uses this type. Values only enter
/// through exact decimal parsing, never through floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

/// Errors produced when converting external input into an [`Amount`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount '{0}'")]
    Format(String),

    #[error("amount {0} has more than {max} decimal places", max = Amount::DECIMALS)]
    Precision(Decimal),

    #[error("amount {0} is out of range")]
    Overflow(Decimal),
}

impl Amount {
    /// Number of fractional digits kept.
    pub const DECIMALS: u32 = 4;
    const SCALE: i64 = 10_000;

    pub const ZERO: Amount = Amount(0);

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole units, e.g. `Amount::from_units(1000)` is `1000.0000`.
    ///
    /// # Panics
    ///
    /// Panics if `units` does not fit once scaled. Parse untrusted input
    /// with [`FromStr`] instead.
    pub const fn from_units(units: i64) -> Self {
        match units.checked_mul(Self::SCALE) {
            Some(scaled) => Amount(scaled),
            None => panic!("amount overflow"),
        }
    }

    /// Exact conversion; rejects values that would need rounding.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        let normalized = value.normalize();
        if normalized.scale() > Self::DECIMALS {
            return Err(AmountError::Precision(value));
        }
        let scaled = normalized
            .checked_mul(Decimal::from(Self::SCALE))
            .ok_or(AmountError::Overflow(value))?;
        i64::try_from(scaled)
            .map(Amount)
            .map_err(|_| AmountError::Overflow(value))
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = Decimal::from_str_exact(s).map_err(|_| AmountError::Format(s.to_string()))?;
        Self::from_decimal(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        let whole = abs / scale;
        let frac = abs % scale;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_scaled_preserves_value() {
        let amount = Amount::from_scaled(123456);
        assert_eq!(amount, Amount(123456));
    }

    #[test]
    fn from_units_scales() {
        assert_eq!(Amount::from_units(1000), Amount::from_scaled(10_000_000));
    }

    #[test]
    #[should_panic(expected = "amount overflow")]
    fn from_units_panics_on_overflow() {
        let _ = Amount::from_units(i64::MAX / 1_000);
    }

    #[test]
    fn parse_exact_decimals() {
        assert_eq!("100".parse::<Amount>(), Ok(Amount::from_scaled(1_000_000)));
        assert_eq!("1.5".parse::<Amount>(), Ok(Amount::from_scaled(15_000)));
        assert_eq!("0.0001".parse::<Amount>(), Ok(Amount::from_scaled(1)));
        assert_eq!(" 42.10 ".parse::<Amount>(), Ok(Amount::from_scaled(421_000)));
    }

    #[test]
    fn parse_trailing_zeros_beyond_precision() {
        // 1.50000 is exactly representable once normalized
        assert_eq!("1.50000".parse::<Amount>(), Ok(Amount::from_scaled(15_000)));
    }

    #[test]
    fn parse_rejects_extra_precision() {
        assert!(matches!(
            "1.23456".parse::<Amount>(),
            Err(AmountError::Precision(_))
        ));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::Format(_))));
        assert!(matches!("".parse::<Amount>(), Err(AmountError::Format(_))));
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!(matches!(
            "99999999999999999999".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn parse_handles_negative() {
        assert_eq!("-50.25".parse::<Amount>(), Ok(Amount::from_scaled(-502_500)));
    }

    #[test]
    fn decimal_conversion_is_exact() {
        let value = Decimal::new(12_345, 4);
        assert_eq!(Amount::from_decimal(value), Ok(Amount::from_scaled(12_345)));
    }

    #[test]
    fn display_formats_positive() {
        assert_eq!(Amount::from_scaled(1_000_000).to_string(), "100.0000");
        assert_eq!(Amount::from_scaled(15_000).to_string(), "1.5000");
        assert_eq!(Amount::from_scaled(1).to_string(), "0.0001");
        assert_eq!(Amount::from_scaled(0).to_string(), "0.0000");
    }

    #[test]
    fn display_formats_negative() {
        assert_eq!(Amount::from_scaled(-502_500).to_string(), "-50.2500");
        assert_eq!(Amount::from_scaled(-1).to_string(), "-0.0001");
    }

    #[test]
    fn checked_arithmetic() {
        let a = Amount::from_scaled(100);
        assert_eq!(a.checked_add(Amount::from_scaled(50)), Some(Amount::from_scaled(150)));
        assert_eq!(a.checked_sub(Amount::from_scaled(30)), Some(Amount::from_scaled(70)));
        assert_eq!(Amount::from_scaled(i64::MAX).checked_add(a), None);
    }

    #[test]
    fn sign_predicates() {
        assert!(Amount::from_scaled(1).is_positive());
        assert!(!Amount::ZERO.is_positive());
        assert!(Amount::from_scaled(-1).is_negative());
    }

    #[test]
    fn sum_adds_up() {
        let total: Amount = [1, 2, 3].into_iter().map(Amount::from_units).sum();
        assert_eq!(total, Amount::from_units(6));
    }

    #[test]
    fn ordering() {
        let small = Amount::from_scaled(100);
        let large = Amount::from_scaled(200);
        assert!(small < large);
        assert!(Amount::from_scaled(-100) < Amount::ZERO);
    }
}
