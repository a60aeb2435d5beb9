//! 64-bit integer carried as two 32-bit halves.
//!
//! The session engine exchanges identifiers, lengths and timestamps as
//! `Long` values. Construction is forgiving: malformed input
//! becomes zero instead of an error, so this type must never carry key
//! material.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const TWO_PWR_32: f64 = 4_294_967_296.0;

/// A 64-bit integer stored as `(low, high, unsigned)`.
///
/// Equality compares the bit pattern and the signedness flag, so
/// `Long::ZERO != Long::UZERO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Long {
    low: u32,
    high: u32,
    unsigned: bool,
}

impl Long {
    pub const ZERO: Long = Long::from_bits(0, 0, false);
    pub const UZERO: Long = Long::from_bits(0, 0, true);
    pub const ONE: Long = Long::from_bits(1, 0, false);
    pub const UONE: Long = Long::from_bits(1, 0, true);
    pub const NEG_ONE: Long = Long::from_bits(u32::MAX, u32::MAX, false);
    pub const MAX_VALUE: Long = Long::from_bits(u32::MAX, 0x7FFF_FFFF, false);
    pub const MIN_VALUE: Long = Long::from_bits(0, 0x8000_0000, false);
    pub const MAX_UNSIGNED_VALUE: Long = Long::from_bits(u32::MAX, u32::MAX, true);

    /// Build from explicit low/high 32-bit halves.
    pub const fn from_bits(low: u32, high: u32, unsigned: bool) -> Self {
        Self {
            low,
            high,
            unsigned,
        }
    }

    pub const fn from_i64(value: i64) -> Self {
        Self::from_bits(value as u32, (value >> 32) as u32, false)
    }

    pub const fn from_u64(value: u64) -> Self {
        Self::from_bits(value as u32, (value >> 32) as u32, true)
    }

    /// Build from a double. NaN yields zero, out-of-range values saturate,
    /// fractions truncate toward zero, negatives clamp to zero when
    /// `unsigned` is set.
    pub fn from_number(value: f64, unsigned: bool) -> Self {
        if value.is_nan() {
            return Self::zero(unsigned);
        }
        // `as` saturates and truncates toward zero.
        if unsigned {
            Self::from_u64(value as u64)
        } else {
            Self::from_i64(value as i64)
        }
    }

    /// Parse a base-10 string. Integers are parsed exactly; anything else
    /// goes through `from_number`, and unparseable input yields zero.
    pub fn from_string(text: &str, unsigned: bool) -> Self {
        let text = text.trim();
        if unsigned {
            if let Ok(v) = text.parse::<u64>() {
                return Self::from_u64(v);
            }
        } else if let Ok(v) = text.parse::<i64>() {
            return Self::from_i64(v);
        }
        match text.parse::<f64>() {
            Ok(v) => Self::from_number(v, unsigned),
            Err(_) => Self::zero(unsigned),
        }
    }

    fn zero(unsigned: bool) -> Self {
        if unsigned {
            Self::UZERO
        } else {
            Self::ZERO
        }
    }

    pub fn low_bits(&self) -> u32 {
        self.low
    }

    pub fn high_bits(&self) -> u32 {
        self.high
    }

    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    pub fn is_negative(&self) -> bool {
        !self.unsigned && (self.high as i32) < 0
    }

    pub fn to_signed(self) -> Self {
        Self::from_bits(self.low, self.high, false)
    }

    pub fn to_unsigned(self) -> Self {
        Self::from_bits(self.low, self.high, true)
    }

    /// Convert to a double as `low + high * 2^32`.
    ///
    /// Values with more than 53 significant bits lose precision here; use
    /// [`Long::to_i64`] or [`Long::to_u64`] when the exact value matters.
    pub fn to_number(&self) -> f64 {
        let high = if self.unsigned {
            self.high as f64
        } else {
            (self.high as i32) as f64
        };
        high * TWO_PWR_32 + self.low as f64
    }

    pub fn to_i64(&self) -> i64 {
        self.bits() as i64
    }

    pub fn to_u64(&self) -> u64 {
        self.bits()
    }

    fn bits(&self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }
}

impl Default for Long {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Long {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unsigned {
            write!(f, "{}", self.to_u64())
        } else {
            write!(f, "{}", self.to_i64())
        }
    }
}

impl From<u32> for Long {
    fn from(value: u32) -> Self {
        Self::from_bits(value, 0, true)
    }
}

impl From<i64> for Long {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<u64> for Long {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

/// JSON form is `{"value": "<decimal>", "unsigned": bool}`: the decimal string
/// keeps all 64 bits and the flag keeps signedness.
impl Serialize for Long {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Long", 2)?;
        state.serialize_field("value", &self.to_string())?;
        state.serialize_field("unsigned", &self.unsigned)?;
        state.end()
    }
}

/// Also accepts a bare decimal string or number. Those carry no flag, so
/// values only representable as `u64` come back unsigned and everything
/// else signed.
impl<'de> Deserialize<'de> for Long {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LongVisitor)
    }
}

struct LongVisitor;

impl<'de> Visitor<'de> for LongVisitor {
    type Value = Long;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a {value, unsigned} object, a decimal string or a number")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Long, A::Error> {
        let mut value: Option<String> = None;
        let mut unsigned = false;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "value" => value = Some(map.next_value()?),
                "unsigned" => unsigned = map.next_value()?,
                _ => {
                    map.next_value::<de::IgnoredAny>()?;
                }
            }
        }
        let value = value.ok_or_else(|| de::Error::missing_field("value"))?;
        Ok(Long::from_string(&value, unsigned))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Long, E> {
        let text = v.trim();
        if let Ok(signed) = text.parse::<i64>() {
            return Ok(Long::from_i64(signed));
        }
        if let Ok(unsigned) = text.parse::<u64>() {
            return Ok(Long::from_u64(unsigned));
        }
        Ok(Long::from_string(text, false))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Long, E> {
        Ok(Long::from_i64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Long, E> {
        match i64::try_from(v) {
            Ok(signed) => Ok(Long::from_i64(signed)),
            Err(_) => Ok(Long::from_u64(v)),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Long, E> {
        Ok(Long::from_number(v, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants() {
        assert_eq!(Long::ZERO.to_i64(), 0);
        assert_eq!(Long::ONE.to_i64(), 1);
        assert_eq!(Long::UONE.to_u64(), 1);
        assert_eq!(Long::NEG_ONE.to_i64(), -1);
        assert_eq!(Long::MAX_VALUE.to_i64(), i64::MAX);
        assert_eq!(Long::MIN_VALUE.to_i64(), i64::MIN);
        assert_eq!(Long::MAX_UNSIGNED_VALUE.to_u64(), u64::MAX);
        assert_ne!(Long::ZERO, Long::UZERO);
    }

    #[test]
    fn from_number_splits_halves() {
        let l = Long::from_number(TWO_PWR_32 * 3.0 + 5.0, false);
        assert_eq!(l.low_bits(), 5);
        assert_eq!(l.high_bits(), 3);
        assert_eq!(l.to_number(), TWO_PWR_32 * 3.0 + 5.0);
    }

    #[test]
    fn from_number_negative_is_twos_complement() {
        let l = Long::from_number(-2.0, false);
        assert_eq!(l.low_bits(), 0xFFFF_FFFE);
        assert_eq!(l.high_bits(), 0xFFFF_FFFF);
        assert!(l.is_negative());
        assert_eq!(l.to_number(), -2.0);
    }

    #[test]
    fn from_number_truncates_fraction() {
        assert_eq!(Long::from_number(42.9, false).to_i64(), 42);
        assert_eq!(Long::from_number(-42.9, false).to_i64(), -42);
    }

    #[test]
    fn nan_and_garbage_coerce_to_zero() {
        assert_eq!(Long::from_number(f64::NAN, false), Long::ZERO);
        assert_eq!(Long::from_number(f64::NAN, true), Long::UZERO);
        assert_eq!(Long::from_string("not a number", false), Long::ZERO);
        assert_eq!(Long::from_string("", true), Long::UZERO);
    }

    #[test]
    fn unsigned_negative_clamps_to_zero() {
        assert_eq!(Long::from_number(-7.0, true), Long::UZERO);
        assert_eq!(Long::from_string("-7", true), Long::UZERO);
    }

    #[test]
    fn out_of_range_saturates() {
        assert_eq!(Long::from_number(1e30, false), Long::MAX_VALUE);
        assert_eq!(Long::from_number(-1e30, false), Long::MIN_VALUE);
        assert_eq!(Long::from_number(1e30, true), Long::MAX_UNSIGNED_VALUE);
    }

    #[test]
    fn from_string_is_exact_beyond_53_bits() {
        let l = Long::from_string("9007199254740993", false);
        assert_eq!(l.to_i64(), 9_007_199_254_740_993);
        // The double conversion cannot represent it.
        assert_eq!(l.to_number(), 9_007_199_254_740_992.0);
    }

    #[test]
    fn from_string_accepts_float_notation() {
        assert_eq!(Long::from_string(" 1e3 ", false).to_i64(), 1000);
        assert_eq!(Long::from_string("12.75", true).to_u64(), 12);
    }

    #[test]
    fn display_respects_signedness() {
        assert_eq!(Long::NEG_ONE.to_string(), "-1");
        assert_eq!(Long::NEG_ONE.to_unsigned().to_string(), u64::MAX.to_string());
        assert_eq!(Long::from(1234u32).to_string(), "1234");
    }

    #[test]
    fn json_keeps_value_and_signedness() {
        let l = Long::from_i64(-9_007_199_254_740_993);
        let json = serde_json::to_string(&l).unwrap();
        assert_eq!(json, r#"{"value":"-9007199254740993","unsigned":false}"#);
        let back: Long = serde_json::from_str(&json).unwrap();
        assert_eq!(back, l);
    }

    #[test]
    fn json_unsigned_roundtrip() {
        for l in [Long::MAX_UNSIGNED_VALUE, Long::UONE, Long::UZERO, Long::from_u64(1 << 63)] {
            let json = serde_json::to_string(&l).unwrap();
            let back: Long = serde_json::from_str(&json).unwrap();
            assert_eq!(back, l, "{json}");
        }
    }

    #[test]
    fn json_accepts_bare_strings_and_numbers() {
        let from_num: Long = serde_json::from_str("77").unwrap();
        assert_eq!(from_num, Long::from_i64(77));
        let big: Long = serde_json::from_str("\"18446744073709551615\"").unwrap();
        assert_eq!(big, Long::MAX_UNSIGNED_VALUE);
        let negative: Long = serde_json::from_str("\"-5\"").unwrap();
        assert_eq!(negative.to_i64(), -5);
        assert!(serde_json::from_str::<Long>(r#"{"unsigned":true}"#).is_err());
    }
}
