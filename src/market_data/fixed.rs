//! Fixed-point decimal values
//!
//! All prices, sizes and volumes travel as [`Fx`]: a signed 64-bit integer
//! scaled by 10^8. Parsing truncates fractional digits beyond eight and
//! saturates instead of panicking when a venue reports something outside the
//! representable range.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Signed 64-bit fixed-point value, `real = raw / 10^8`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fx(i64);

impl Fx {
    pub const SCALE: i64 = 100_000_000;
    pub const DECIMALS: u32 = 8;
    pub const ZERO: Fx = Fx(0);

    pub const fn from_raw(raw: i64) -> Self {
        Fx(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole-number constructor, saturating on overflow.
    pub fn from_int(value: i64) -> Self {
        Fx(clamp(value as i128 * Self::SCALE as i128))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parse a decimal literal: optional leading `-`, integer part, optional
    /// fractional part. Fractions beyond eight digits are truncated, shorter
    /// ones are right-padded. Empty input yields zero. Values outside the
    /// `i64` range saturate. Returns `None` for non-numeric input.
    pub fn parse(s: &str) -> Option<Fx> {
        let s = s.trim();
        if s.is_empty() {
            return Some(Fx::ZERO);
        }
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let whole: i128 = if int_part.is_empty() {
            0
        } else {
            // A pure-digit string only fails to parse on overflow.
            int_part.parse().unwrap_or(i128::MAX)
        };

        let mut frac: i128 = 0;
        let mut digits = 0u32;
        for b in frac_part.bytes().take(Self::DECIMALS as usize) {
            frac = frac * 10 + (b - b'0') as i128;
            digits += 1;
        }
        frac *= 10i128.pow(Self::DECIMALS - digits);

        let magnitude = whole
            .saturating_mul(Self::SCALE as i128)
            .saturating_add(frac);
        Some(Fx(clamp(if negative { -magnitude } else { magnitude })))
    }

    /// Canonical decimal rendering with `decimals` fractional digits
    /// (clamped to 0..=8), truncating.
    pub fn format(self, decimals: u32) -> String {
        let decimals = decimals.min(Self::DECIMALS);
        let magnitude = (self.0 as i128).unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        let whole = magnitude / Self::SCALE as u128;
        if decimals == 0 {
            return format!("{sign}{whole}");
        }
        let frac = magnitude % Self::SCALE as u128;
        let frac = frac / 10u128.pow(Self::DECIMALS - decimals);
        format!("{sign}{whole}.{frac:0width$}", width = decimals as usize)
    }

    /// Fixed-point product, computed in 128-bit then rescaled; saturating.
    pub fn mul(self, rhs: Fx) -> Fx {
        Fx(clamp(self.0 as i128 * rhs.0 as i128 / Self::SCALE as i128))
    }

    /// Fixed-point quotient `(self * 10^8) / rhs` in 128-bit; saturating.
    /// A zero divisor yields zero.
    pub fn div(self, rhs: Fx) -> Fx {
        if rhs.0 == 0 {
            return Fx::ZERO;
        }
        Fx(clamp(self.0 as i128 * Self::SCALE as i128 / rhs.0 as i128))
    }

    /// Saturating sum.
    pub fn saturating_add(self, rhs: Fx) -> Fx {
        Fx(self.0.saturating_add(rhs.0))
    }
}

fn clamp(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}

impl fmt::Display for Fx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(Self::DECIMALS))
    }
}

impl Serialize for Fx {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format(Self::DECIMALS))
    }
}

impl<'de> Deserialize<'de> for Fx {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let parsed = match &value {
            serde_json::Value::String(s) => Fx::parse(s),
            serde_json::Value::Number(n) => Fx::parse(&n.to_string()),
            _ => None,
        };
        parsed.ok_or_else(|| de::Error::custom(format!("invalid fixed-point value: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        assert_eq!(Fx::parse("0").unwrap().raw(), 0);
        assert_eq!(Fx::parse("1").unwrap().raw(), 100_000_000);
        assert_eq!(Fx::parse("1.5").unwrap().raw(), 150_000_000);
        assert_eq!(Fx::parse("-2.25").unwrap().raw(), -225_000_000);
        assert_eq!(Fx::parse(".5").unwrap().raw(), 50_000_000);
        assert_eq!(Fx::parse("16578.50").unwrap().raw(), 1_657_850_000_000);
    }

    #[test]
    fn test_parse_empty_is_zero() {
        assert_eq!(Fx::parse("").unwrap(), Fx::ZERO);
        assert_eq!(Fx::parse("   ").unwrap(), Fx::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Fx::parse("abc").is_none());
        assert!(Fx::parse("1.2.3").is_none());
        assert!(Fx::parse("-").is_none());
        assert!(Fx::parse(".").is_none());
        assert!(Fx::parse("1e5").is_none());
    }

    #[test]
    fn test_parse_truncates_past_eight_digits() {
        assert_eq!(
            Fx::parse("1.123456789").unwrap(),
            Fx::parse("1.12345678").unwrap()
        );
        assert_eq!(
            Fx::parse("0.999999999").unwrap(),
            Fx::parse("0.99999999").unwrap()
        );
    }

    #[test]
    fn test_parse_saturates_on_overflow() {
        assert_eq!(Fx::parse("99999999999999999999").unwrap().raw(), i64::MAX);
        assert_eq!(Fx::parse("-99999999999999999999").unwrap().raw(), i64::MIN);
    }

    #[test]
    fn test_format_round_trip() {
        for s in ["0.00000000", "1.50000000", "-2.25000000", "101.33333333"] {
            assert_eq!(Fx::parse(s).unwrap().format(8), s);
        }
    }

    #[test]
    fn test_format_narrowing_truncates() {
        let v = Fx::parse("1.99999999").unwrap();
        assert_eq!(v.format(2), "1.99");
        assert_eq!(v.format(0), "1");
        let v = Fx::parse("-1.99999999").unwrap();
        assert_eq!(v.format(2), "-1.99");
    }

    #[test]
    fn test_arithmetic() {
        let two = Fx::parse("2").unwrap();
        let three = Fx::parse("3").unwrap();
        assert_eq!(two.mul(three).format(8), "6.00000000");
        assert_eq!(Fx::parse("1").unwrap().div(three).format(8), "0.33333333");
        assert_eq!(two.div(Fx::ZERO), Fx::ZERO);
    }

    #[test]
    fn test_mul_widens_past_i64() {
        // price 100_000 * size 10_000 overflows i64 in raw form
        // without the 128-bit intermediate.
        let price = Fx::parse("100000").unwrap();
        let size = Fx::parse("10000").unwrap();
        assert_eq!(price.mul(size).format(8), "1000000000.00000000");
    }

    #[test]
    fn test_serde_string_form() {
        let v = Fx::parse("101.33333333").unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"101.33333333\"");
        let back: Fx = serde_json::from_str("\"101.33333333\"").unwrap();
        assert_eq!(back, v);
        let numeric: Fx = serde_json::from_str("16578.5").unwrap();
        assert_eq!(numeric, Fx::parse("16578.5").unwrap());
    }
}
