//! Non-negative monetary amounts stored in minor units.

use std::fmt::{self, Display, Formatter};
use std::ops::Add;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Amount in cents. Negative values are unrepresentable.
///
/// The backend stores prices as decimal numbers in major units; this type
/// converts at the serde boundary and rounds to the nearest cent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Construct from minor units (cents).
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Construct from whole major units.
    #[must_use]
    pub const fn from_major(units: u64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Amount in minor units.
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiply by a quantity, saturating on overflow.
    #[must_use]
    pub const fn times(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as u64))
    }

    fn from_major_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents > 9_007_199_254_740_992.0 {
            return None;
        }
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "value is finite, non-negative, rounded, and below 2^53"
        )]
        let cents = cents as u64;
        Some(Self(cents))
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Display for Money {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[expect(
            clippy::cast_precision_loss,
            reason = "wire format is a JSON number in major units"
        )]
        let major = self.0 as f64 / 100.0;
        serializer.serialize_f64(major)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

struct MoneyVisitor;

impl Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("a non-negative decimal amount")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Money, E> {
        Ok(Money::from_major(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Money, E> {
        u64::try_from(value)
            .map(Money::from_major)
            .map_err(|_| E::custom("amount must not be negative"))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Money, E> {
        Money::from_major_f64(value)
            .ok_or_else(|| E::custom("amount must be a finite, non-negative number"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Money, E> {
        let parsed = value
            .trim()
            .parse::<f64>()
            .map_err(|_| E::custom("amount string is not a number"))?;
        self.visit_f64(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_decimal_and_integer_amounts() -> anyhow::Result<()> {
        assert_eq!(serde_json::from_value::<Money>(json!(12.5))?, Money::from_cents(1_250));
        assert_eq!(serde_json::from_value::<Money>(json!(7))?, Money::from_cents(700));
        assert_eq!(serde_json::from_value::<Money>(json!("0.1"))?, Money::from_cents(10));
        Ok(())
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(serde_json::from_value::<Money>(json!(-1)).is_err());
        assert!(serde_json::from_value::<Money>(json!(-0.01)).is_err());
    }

    #[test]
    fn encodes_as_major_units() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(Money::from_cents(1_999))?, json!(19.99));
        assert_eq!(Money::from_cents(1_999).to_string(), "19.99");
        Ok(())
    }

    #[test]
    fn arithmetic_saturates() {
        assert_eq!(Money::from_cents(250).times(3), Money::from_cents(750));
        assert_eq!(Money::from_cents(u64::MAX).times(2), Money::from_cents(u64::MAX));
        assert_eq!(Money::from_cents(1) + Money::from_cents(2), Money::from_cents(3));
    }
}
