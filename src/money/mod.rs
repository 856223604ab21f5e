//! Fixed-point money and percentage arithmetic.
//!
//! Amounts are stored as hundredths in an `i64`. Parsed input rounds half up
//! to cents; computed figures (line VAT, totals, VAT splits) round half to
//! even. Arithmetic saturates instead of overflowing.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Currencies Stripe charges in whole units.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF", "HUF",
];

/// Largest exponent accepted in `1e3` style input.
const MAX_EXPONENT: i64 = 1000;

/// A monetary amount (or a percentage) with two decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    pub const fn from_units(units: i64) -> Self {
        Amount(units.saturating_mul(100))
    }

    /// `None` when `units` does not fit.
    pub fn checked_from_units(units: i64) -> Option<Self> {
        units.checked_mul(100).map(Amount)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parse a decimal string, treating blanks and garbage as zero.
    ///
    /// Legacy rows hold empty strings and stray text in numeric columns, so
    /// this never fails.
    pub fn parse_lenient(text: &str) -> Self {
        Self::parse(text).unwrap_or(Amount::ZERO)
    }

    /// Same as [`Amount::parse_lenient`] for optional column values.
    pub fn from_opt(text: Option<&str>) -> Self {
        text.map(Self::parse_lenient).unwrap_or(Amount::ZERO)
    }

    /// Strict parse: `[-+]digits[.digits][e[-+]digits]`, rounded half up to
    /// cents. `None` for malformed text and for values that do not fit.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Some(Amount::ZERO);
        }

        let (negative, unsigned) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (mantissa, exponent) = match unsigned.find(|c: char| c == 'e' || c == 'E') {
            Some(pos) => {
                let exponent: i64 = unsigned[pos + 1..].parse().ok()?;
                if exponent.abs() > MAX_EXPONENT {
                    return None;
                }
                (&unsigned[..pos], exponent)
            }
            None => (unsigned, 0),
        };

        let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        // Digits with the decimal point moved by the exponent.
        let digits: Vec<i64> = whole
            .bytes()
            .chain(fraction.bytes())
            .map(|b| i64::from(b - b'0'))
            .collect();
        let point = whole.len() as i64 + exponent;
        let digit = |i: i64| {
            usize::try_from(i)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let mut cents: i64 = 0;
        for i in 0..point + 2 {
            cents = cents.checked_mul(10)?.checked_add(digit(i))?;
        }
        if digit(point + 2) >= 5 {
            cents = cents.checked_add(1)?;
        }

        Some(Amount(if negative { -cents } else { cents }))
    }

    /// `self * other` at full precision, for rounding later.
    pub fn times(self, other: Amount) -> Product {
        Product(i128::from(self.0).saturating_mul(i128::from(other.0)))
    }

    /// Split the net part out of a VAT-inclusive amount.
    pub fn net_from_gross(self, rate: Amount) -> Amount {
        if rate.0 <= 0 {
            return self;
        }
        Amount(saturate(div_half_even(
            i128::from(self.0) * 10_000,
            10_000 + i128::from(rate.0),
        )))
    }

    /// Clamp negatives to zero.
    pub fn non_negative(self) -> Amount {
        if self.0 < 0 {
            Amount::ZERO
        } else {
            self
        }
    }

    /// Amount expressed in the smallest unit of `currency`.
    pub fn to_minor_units(self, currency: &str) -> i64 {
        let code = currency.trim().to_uppercase();
        let code = if code.is_empty() { "EUR".to_string() } else { code };
        if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
            saturate(div_half_even(i128::from(self.0), 100))
        } else {
            self.0
        }
    }

    /// Lossy conversion for JSON consumers that expect numbers.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

/// An unrounded product of two amounts, in ten-thousandths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Product(i128);

impl Product {
    /// Rounded half to even to cents.
    pub fn round(self) -> Amount {
        Amount(saturate(div_half_even(self.0, 100)))
    }

    /// `self * rate / 100` rounded half to even, with `rate` a percentage.
    pub fn percent(self, rate: Amount) -> Amount {
        Amount(saturate(div_half_even(
            self.0.saturating_mul(i128::from(rate.0)),
            1_000_000,
        )))
    }

    /// `self + amount` rounded half to even.
    pub fn plus(self, amount: Amount) -> Amount {
        let sum = self.0.saturating_add(i128::from(amount.0) * 100);
        Amount(saturate(div_half_even(sum, 100)))
    }
}

impl Add for Product {
    type Output = Product;
    fn add(self, rhs: Product) -> Product {
        Product(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Product {
    fn add_assign(&mut self, rhs: Product) {
        *self = *self + rhs;
    }
}

/// `numerator / denominator` rounded half to even; `denominator` is positive.
fn div_half_even(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let twice_remainder = (numerator % denominator).abs() * 2;
    let away = twice_remainder > denominator
        || (twice_remainder == denominator && quotient % 2 != 0);
    if away {
        quotient + numerator.signum()
    } else {
        quotient
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        *self = *self + rhs;
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        *self = *self - rhs;
    }
}

impl Neg for Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Numbers get the same leniency as text: out of range means zero.
struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal amount as string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        Ok(Amount::parse_lenient(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Ok(Amount::checked_from_units(v).unwrap_or(Amount::ZERO))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(i64::try_from(v)
            .ok()
            .and_then(Amount::checked_from_units)
            .unwrap_or(Amount::ZERO))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        // Display gives the shortest text that reads back as `v`.
        Ok(Amount::parse_lenient(&v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Amount, E> {
        Ok(Amount::ZERO)
    }

    fn visit_none<E: de::Error>(self) -> Result<Amount, E> {
        Ok(Amount::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rounds_half_up() {
        assert_eq!(Amount::parse_lenient("12.345"), Amount::from_cents(1235));
        assert_eq!(Amount::parse_lenient("12.344"), Amount::from_cents(1234));
        assert_eq!(Amount::parse_lenient("-0.005"), Amount::from_cents(-1));
        assert_eq!(Amount::parse_lenient("7"), Amount::from_cents(700));
        assert_eq!(Amount::parse_lenient(".5"), Amount::from_cents(50));
    }

    #[test]
    fn test_parse_lenient_blank_and_garbage() {
        assert_eq!(Amount::parse_lenient(""), Amount::ZERO);
        assert_eq!(Amount::parse_lenient("   "), Amount::ZERO);
        assert_eq!(Amount::parse_lenient("abc"), Amount::ZERO);
        assert_eq!(Amount::parse_lenient("1.2.3"), Amount::ZERO);
        assert_eq!(Amount::from_opt(None), Amount::ZERO);
        assert!(Amount::parse("abc").is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_cents(123456).to_string(), "1234.56");
        assert_eq!(Amount::from_cents(-5).to_string(), "-0.05");
        assert_eq!(Amount::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_parse_exponent_forms() {
        assert_eq!(Amount::parse("1e3"), Some(Amount::from_units(1000)));
        assert_eq!(Amount::parse("2.5E-1"), Some(Amount::from_cents(25)));
        assert_eq!(Amount::parse("-1.005e0"), Some(Amount::from_cents(-101)));
        assert_eq!(Amount::parse("1e"), None);
        assert_eq!(Amount::parse("e5"), None);
        assert_eq!(Amount::parse("1e99999"), None);
    }

    #[test]
    fn test_parse_out_of_range() {
        assert_eq!(Amount::parse("100000000000000000"), None);
        assert_eq!(Amount::parse_lenient("1e30"), Amount::ZERO);
    }

    #[test]
    fn test_products_round_half_even() {
        let quarter = Amount::from_cents(25);
        let half = Amount::from_cents(50);
        let exact = half.times(quarter);
        assert_eq!(exact.round(), Amount::from_cents(12));
        assert_eq!((exact + exact).round(), Amount::from_cents(25));
        assert_eq!(exact.percent(Amount::from_units(21)), Amount::from_cents(3));
        assert_eq!(exact.plus(Amount::from_cents(3)), Amount::from_cents(16));

        let net = Amount::from_units(3).times(Amount::parse_lenient("33.33"));
        assert_eq!(net.round(), Amount::from_cents(9999));
        assert_eq!(net.percent(Amount::from_units(21)), Amount::from_cents(2100));
    }

    #[test]
    fn test_net_from_gross() {
        let gross = Amount::from_units(121);
        assert_eq!(gross.net_from_gross(Amount::from_units(21)), Amount::from_units(100));
        assert_eq!(gross.net_from_gross(Amount::ZERO), gross);
        assert_eq!(Amount::from_units(100).net_from_gross(Amount::from_units(21)), Amount::from_cents(8264));
    }

    #[test]
    fn test_arithmetic_saturates() {
        let max = Amount::from_cents(i64::MAX);
        assert_eq!(max + Amount::from_cents(1), max);
        assert_eq!(Amount::from_units(i64::MAX), max);
        assert_eq!(max.times(max).round(), max);
        assert_eq!(-Amount::from_cents(i64::MIN), max);
    }

    #[test]
    fn test_minor_units() {
        let amount = Amount::parse_lenient("1234.50");
        assert_eq!(amount.to_minor_units("eur"), 123450);
        assert_eq!(amount.to_minor_units("JPY"), 1234);
        assert_eq!(Amount::parse_lenient("1235.50").to_minor_units("JPY"), 1236);
        assert_eq!(amount.to_minor_units(""), 123450);
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&Amount::from_cents(1050)).unwrap();
        assert_eq!(json, "\"10.50\"");

        let from_str: Amount = serde_json::from_str("\"10.5\"").unwrap();
        let from_num: Amount = serde_json::from_str("10.5").unwrap();
        let from_int: Amount = serde_json::from_str("10").unwrap();
        assert_eq!(from_str, Amount::from_cents(1050));
        assert_eq!(from_num, Amount::from_cents(1050));
        assert_eq!(from_int, Amount::from_cents(1000));
    }

    #[test]
    fn test_deserialize_large_numbers_as_zero() {
        let huge: Amount = serde_json::from_str("100000000000000000").unwrap();
        let negative: Amount = serde_json::from_str("-100000000000000000").unwrap();
        let beyond_i64: Amount = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(huge, Amount::ZERO);
        assert_eq!(negative, Amount::ZERO);
        assert_eq!(beyond_i64, Amount::ZERO);
    }

    #[test]
    fn test_deserialize_float_without_double_rounding() {
        let sum: Amount = serde_json::from_str("0.30000000000000004").unwrap();
        let third: Amount = serde_json::from_str("1.0049999").unwrap();
        assert_eq!(sum, Amount::from_cents(30));
        assert_eq!(third, Amount::from_cents(100));
    }
}
