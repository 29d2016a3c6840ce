//! Resource quantities
//!
//! Fixed-point quantities in the `200m`, `64Mi`, `1G`, `1e3` notation used by
//! resource requests, limits and memory sizes.

use crate::error::QuantityError;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const NANOS_PER_UNIT: i128 = 1_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;
const SUFFIX_CHARS: &[u8] = b"eEinumkKMGTP";

/// A resource quantity with nano-unit precision.
///
/// Equality and ordering compare the numeric value; the original text is kept
/// for display so messages echo what the caller wrote.
#[derive(Debug, Clone)]
pub struct Quantity {
    nanos: i128,
    text: String,
}

/// Multiplier a suffix applies to the numeric part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    /// Power of ten
    Decimal(i32),
    /// Power of 1024
    Binary(u32),
}

impl Quantity {
    /// Parse a quantity from its text form
    pub fn parse(text: &str) -> Result<Self, QuantityError> {
        let (number, suffix) = split(text)?;
        let scale = parse_suffix(suffix)?;
        let nanos = to_nanos(number, scale)?;
        Ok(Self {
            nanos,
            text: text.to_string(),
        })
    }

    /// A zero quantity
    pub fn zero() -> Self {
        Self::from_units(0)
    }

    /// Quantity of whole units
    pub fn from_units(units: i64) -> Self {
        Self {
            nanos: i128::from(units) * NANOS_PER_UNIT,
            text: units.to_string(),
        }
    }

    /// Quantity of milli-units
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: i128::from(millis) * NANOS_PER_MILLI,
            text: format!("{millis}m"),
        }
    }

    /// Value rounded up to whole units
    pub fn value(&self) -> i128 {
        round_up(self.nanos, NANOS_PER_UNIT)
    }

    /// Value rounded up to milli-units
    pub fn milli_value(&self) -> i128 {
        round_up(self.nanos, NANOS_PER_MILLI)
    }

    /// Exact value in nano-units
    pub fn nanos(&self) -> i128 {
        self.nanos
    }

    /// Whether the quantity is zero
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Whether the quantity is below zero
    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// Whether the quantity is a whole number of units
    pub fn is_integer(&self) -> bool {
        self.value() * 1000 == self.milli_value()
    }

    /// Original text of the quantity
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a quantity string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        Quantity::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        Ok(Quantity::from_units(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        Quantity::parse(&v.to_string()).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
        Quantity::parse(&v.to_string()).map_err(E::custom)
    }
}

/// Split text into numeric part and suffix following
/// `^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$`.
fn split(text: &str) -> Result<(&str, &str), QuantityError> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        pos = 1;
    }
    let digits_start = pos;
    while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
        pos += 1;
    }
    if pos == digits_start {
        return Err(QuantityError::FormatWrong);
    }

    let (number, suffix) = text.split_at(pos);
    let rest = suffix.as_bytes();
    let mut i = 0;
    while i < rest.len() && SUFFIX_CHARS.contains(&rest[i]) {
        i += 1;
    }
    if i < rest.len() && (rest[i] == b'+' || rest[i] == b'-') {
        i += 1;
    }
    while i < rest.len() && rest[i].is_ascii_digit() {
        i += 1;
    }
    if i != rest.len() {
        return Err(QuantityError::FormatWrong);
    }
    Ok((number, suffix))
}

fn parse_suffix(suffix: &str) -> Result<Scale, QuantityError> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        other => {
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))
                .ok_or(QuantityError::Suffix)?;
            let exponent: i32 = exponent.parse().map_err(|_| QuantityError::Suffix)?;
            Scale::Decimal(exponent)
        }
    };
    Ok(scale)
}

fn to_nanos(number: &str, scale: Scale) -> Result<i128, QuantityError> {
    let (negative, unsigned) = match number.as_bytes().first() {
        Some(b'-') => (true, &number[1..]),
        Some(b'+') => (false, &number[1..]),
        _ => (false, number),
    };

    let (whole, fraction) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };
    if fraction.contains('.') || (whole.is_empty() && fraction.is_empty()) {
        return Err(QuantityError::Numeric);
    }

    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(i128::from(digit - b'0')))
            .ok_or(QuantityError::OutOfRange)?;
    }
    if negative {
        mantissa = -mantissa;
    }
    let fraction_digits = i32::try_from(fraction.len()).map_err(|_| QuantityError::OutOfRange)?;

    match scale {
        Scale::Decimal(exponent) => {
            let shift = exponent
                .checked_add(9)
                .and_then(|s| s.checked_sub(fraction_digits))
                .ok_or(QuantityError::OutOfRange)?;
            if shift >= 0 {
                let factor = pow10(shift)?;
                mantissa
                    .checked_mul(factor)
                    .ok_or(QuantityError::OutOfRange)
            } else if shift < -38 {
                Ok(mantissa.signum())
            } else {
                Ok(round_up(mantissa, pow10(-shift)?))
            }
        }
        Scale::Binary(power) => {
            let factor = 1i128
                .checked_shl(10 * power)
                .ok_or(QuantityError::OutOfRange)?;
            let scaled = mantissa
                .checked_mul(factor)
                .and_then(|m| m.checked_mul(NANOS_PER_UNIT))
                .ok_or(QuantityError::OutOfRange)?;
            Ok(round_up(scaled, pow10(fraction_digits)?))
        }
    }
}

fn pow10(exponent: i32) -> Result<i128, QuantityError> {
    let exponent = u32::try_from(exponent).map_err(|_| QuantityError::OutOfRange)?;
    10i128
        .checked_pow(exponent)
        .ok_or(QuantityError::OutOfRange)
}

/// Integer division rounding away from zero
fn round_up(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    if value % divisor != 0 {
        quotient + value.signum()
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(Quantity::parse("1M").unwrap().value(), 1_000_000);
        assert_eq!(Quantity::parse("2k").unwrap().value(), 2_000);
        assert_eq!(Quantity::parse("1G").unwrap().value(), 1_000_000_000);
        assert_eq!(Quantity::parse("1e3").unwrap().value(), 1_000);
    }

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(Quantity::parse("64Mi").unwrap().value(), 64 * 1024 * 1024);
        assert_eq!(Quantity::parse("2Gi").unwrap().value(), 2 * 1024 * 1024 * 1024);
        assert_eq!(Quantity::parse("1.5Ki").unwrap().value(), 1536);
    }

    #[test]
    fn test_milli_values() {
        let q = Quantity::parse("200m").unwrap();
        assert_eq!(q.milli_value(), 200);
        assert_eq!(q.value(), 1);
        assert!(!q.is_integer());

        let neg = Quantity::parse("-200m").unwrap();
        assert!(neg.is_negative());
        assert_eq!(neg.milli_value(), -200);

        assert!(Quantity::parse("2").unwrap().is_integer());
        assert!(Quantity::parse("2000m").unwrap().is_integer());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Quantity::parse("2ab"), Err(QuantityError::FormatWrong));
        assert_eq!(Quantity::parse(""), Err(QuantityError::FormatWrong));
        assert_eq!(Quantity::parse("Mi"), Err(QuantityError::FormatWrong));
        assert_eq!(Quantity::parse("1.2.3"), Err(QuantityError::Numeric));
        assert_eq!(Quantity::parse("1kM"), Err(QuantityError::Suffix));
    }

    #[test]
    fn test_equality_is_numeric() {
        assert_eq!(Quantity::parse("1Ki").unwrap(), Quantity::parse("1024").unwrap());
        assert!(Quantity::parse("1M").unwrap() < Quantity::parse("1Mi").unwrap());
        assert_eq!(Quantity::parse("1Ki").unwrap().to_string(), "1Ki");
    }

    #[test]
    fn test_serde_accepts_strings_and_numbers() {
        let q: Quantity = serde_json::from_str("\"512Mi\"").unwrap();
        assert_eq!(q.as_str(), "512Mi");
        let n: Quantity = serde_json::from_str("4").unwrap();
        assert_eq!(n.value(), 4);
        assert_eq!(serde_json::to_string(&q).unwrap(), "\"512Mi\"");
        assert!(serde_json::from_str::<Quantity>("\"2ab\"").is_err());
    }

    #[test]
    fn test_extreme_exponents() {
        assert_eq!(Quantity::parse("1e2147483647"), Err(QuantityError::OutOfRange));
        assert_eq!(Quantity::parse("1E2147483647"), Err(QuantityError::OutOfRange));
        assert_eq!(Quantity::parse("-1e2147483647"), Err(QuantityError::OutOfRange));
        assert_eq!(
            Quantity::parse("1.0000000000e-2147483648"),
            Err(QuantityError::OutOfRange)
        );
        assert_eq!(Quantity::parse("1e-2147483648").unwrap().nanos(), 1);
        assert_eq!(Quantity::parse("1.000000000E-2147483648").unwrap().nanos(), 1);
        assert_eq!(Quantity::parse("-1e-2147483648").unwrap().nanos(), -1);
        assert_eq!(Quantity::parse("1e2147483648"), Err(QuantityError::Suffix));
    }

    proptest! {
        #[test]
        fn property_whole_units_parse_exactly(units in -1_000_000i64..1_000_000) {
            let q = Quantity::parse(&units.to_string()).unwrap();
            prop_assert_eq!(q.value(), i128::from(units));
            prop_assert!(q.is_integer());
        }
    }
}
