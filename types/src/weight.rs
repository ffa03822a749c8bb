use std::fmt;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// A tipset's weight: a totally-ordered big integer assigned by the chain
/// protocol. Heavier means more accumulated work.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weight(BigInt);

impl Weight {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn from_decimal_str(s: &str) -> Result<Self, num_bigint::ParseBigIntError> {
        Ok(Self(s.parse()?))
    }

    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }
}

impl From<BigInt> for Weight {
    fn from(value: BigInt) -> Self {
        Self(value)
    }
}

impl From<u64> for Weight {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value))
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_magnitude() {
        let small = Weight::from(100u64);
        let large = Weight::from(120u64);
        assert!(large > small);
        assert!(small < large);
        assert_eq!(small.clone(), Weight::from(100u64));
    }

    #[test]
    fn parses_decimal_strings() {
        let w = Weight::from_decimal_str("123456789012345678901234567890").unwrap();
        assert_eq!(w.to_string(), "123456789012345678901234567890");
    }
}
