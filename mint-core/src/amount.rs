use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// A non-negative asset amount in `[0, 2^128)`.
///
/// The range invariant holds by construction (the representation is `u128`);
/// every arithmetic operation is checked and surfaces an error instead of
/// wrapping. Amounts serialize as decimal strings on the wire because they
/// exceed the range of JSON-safe integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u128) -> Amount {
        Amount(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Amount) -> Result<Amount, CodecError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| CodecError::AmountOverflow(format!("{} + {}", self.0, other.0)))
    }

    pub fn checked_sub(&self, other: Amount) -> Result<Amount, CodecError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| CodecError::AmountOverflow(format!("{} - {}", self.0, other.0)))
    }

    /// Ceiling ratio multiplication `ceil(self * p / q)`, the rounding rule
    /// used when computing hop amounts: the upstream hop always covers at
    /// least the downstream target.
    pub fn scale_ceil(&self, price: &Price) -> Result<Amount, CodecError> {
        let product = self
            .0
            .checked_mul(price.numerator)
            .ok_or_else(|| CodecError::AmountOverflow(format!("{} * {}", self.0, price.numerator)))?;
        let adjusted = product
            .checked_add(price.denominator - 1)
            .ok_or_else(|| CodecError::AmountOverflow(format!("{} + {}", product, price.denominator - 1)))?;
        Ok(Amount(adjusted / price.denominator))
    }
}

impl FromStr for Amount {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Amount, CodecError> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodecError::InvalidAmount(s.to_string()));
        }
        s.parse::<u128>()
            .map(Amount)
            .map_err(|_| CodecError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative decimal integer string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(AmountVisitor)
    }
}

/// A fixed exchange price `numerator/denominator`: `numerator` base units per
/// `denominator` quote units. Both terms are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Price {
    pub numerator: u128,
    pub denominator: u128,
}

impl Price {
    pub fn new(numerator: u128, denominator: u128) -> Result<Price, CodecError> {
        if numerator == 0 || denominator == 0 {
            return Err(CodecError::InvalidPrice(format!(
                "{}/{}",
                numerator, denominator
            )));
        }
        Ok(Price {
            numerator,
            denominator,
        })
    }
}

impl FromStr for Price {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Price, CodecError> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| CodecError::InvalidPrice(s.to_string()))?;
        let parse = |part: &str| -> Result<u128, CodecError> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CodecError::InvalidPrice(s.to_string()));
            }
            part.parse::<u128>()
                .map_err(|_| CodecError::InvalidPrice(s.to_string()))
        };
        Price::new(parse(num)?, parse(den)?)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Price, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_plain_integers() {
        assert_eq!("0".parse::<Amount>().unwrap(), Amount::new(0));
        assert_eq!("10".parse::<Amount>().unwrap(), Amount::new(10));
        assert_eq!(
            "340282366920938463463374607431768211455".parse::<Amount>().unwrap(),
            Amount::new(u128::MAX)
        );
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!("-10".parse::<Amount>().is_err());
        assert!("+10".parse::<Amount>().is_err());
        assert!("10.5".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        // One past 2^128 - 1.
        assert!("340282366920938463463374607431768211456".parse::<Amount>().is_err());
    }

    #[test]
    fn checked_arithmetic_surfaces_overflow() {
        assert!(Amount::new(u128::MAX).checked_add(Amount::new(1)).is_err());
        assert!(Amount::new(0).checked_sub(Amount::new(1)).is_err());
        assert_eq!(
            Amount::new(3).checked_add(Amount::new(4)).unwrap(),
            Amount::new(7)
        );
    }

    #[test]
    fn scale_ceil_rounds_up() {
        let p = Price::new(100, 98).unwrap();
        assert_eq!(Amount::new(10).scale_ceil(&p).unwrap(), Amount::new(11));
        let even = Price::new(100, 100).unwrap();
        assert_eq!(Amount::new(11).scale_ceil(&even).unwrap(), Amount::new(11));
        assert_eq!(Amount::new(0).scale_ceil(&p).unwrap(), Amount::new(0));
    }

    #[test]
    fn price_parse_round_trip() {
        let p: Price = "100/98".parse().unwrap();
        assert_eq!(p.to_string(), "100/98");
        assert!("0/98".parse::<Price>().is_err());
        assert!("100/0".parse::<Price>().is_err());
        assert!("100".parse::<Price>().is_err());
        assert!("-1/2".parse::<Price>().is_err());
    }

    proptest! {
        #[test]
        fn amount_display_parse_round_trip(v in any::<u128>()) {
            let a = Amount::new(v);
            prop_assert_eq!(a.to_string().parse::<Amount>().unwrap(), a);
        }

        #[test]
        fn scale_ceil_covers_exact_ratio(v in 0u128..1u128 << 64, p in 1u128..10_000, q in 1u128..10_000) {
            let price = Price::new(p, q).unwrap();
            let scaled = Amount::new(v).scale_ceil(&price).unwrap();
            // ceil(v*p/q) * q >= v * p, and it is the least such multiple.
            prop_assert!(scaled.value() * q >= v * p);
            prop_assert!(scaled.value().saturating_sub(1) * q < v * p || scaled.is_zero());
        }
    }
}
