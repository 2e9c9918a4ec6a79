use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building an [`Amount`].
#[derive(Debug, Error)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Parse(#[from] rust_decimal::Error),

    #[error("amount {0} has more than {scale} decimal places", scale = Amount::SCALE)]
    Precision(Decimal),

    #[error("amount {0} is outside the range of {max}", max = Amount::MAX)]
    OutOfRange(Decimal),
}

/// Fixed-point decimal with 2 decimal places, the unit of every balance and transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub const SCALE: u32 = 2;

    pub const ZERO: Self = Amount(Decimal::from_parts(0, 0, 0, false, Self::SCALE));

    /// Largest magnitude a balance or amount may reach: 999999999999999999.99,
    /// the range of a `decimal(20,2)` column.
    pub const MAX: Self = Amount(Decimal::from_parts(
        1_661_992_959,
        1_808_227_885,
        5,
        false,
        Self::SCALE,
    ));

    /// Build an amount from a decimal, rejecting values that would need rounding.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.normalize().scale() > Self::SCALE {
            return Err(AmountError::Precision(value));
        }
        let mut scaled = value;
        scaled.rescale(Self::SCALE);
        Self::bounded(scaled).ok_or(AmountError::OutOfRange(value))
    }

    /// Accept a value only if it kept the full scale and stays within [`Amount::MAX`].
    ///
    /// `Decimal` arithmetic drops fractional digits instead of failing when the
    /// mantissa runs out. A result below `SCALE` has been rounded.
    fn bounded(value: Decimal) -> Option<Self> {
        if value.scale() < Self::SCALE || value.abs() > Self::MAX.0 {
            return None;
        }
        Some(Amount(value))
    }

    /// Build an amount from minor units (cents).
    pub fn from_minor(units: i64) -> Self {
        Amount(Decimal::new(units, Self::SCALE))
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).and_then(Self::bounded)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).and_then(Self::bounded)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())?;
        Amount::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}
