//! Amount type for monetary values.
//!
//! Amounts are stored and written with two decimal places and a `.` decimal separator. Reading is
//! lenient because spreadsheet cells come back formatted according to the sheet's locale, e.g.
//! `R$ 1.234,56`, `$1,234.56` or `20`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// A monetary value. `Display` always renders two decimal places, e.g. `25.00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Returns the underlying `Decimal` value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_positive()
    }

    /// Adds `rhs`, returning `None` instead of overflowing.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Renders the amount with thousands separators, e.g. `1,234.50`.
    pub fn grouped(&self) -> String {
        let sign = if self.0.is_sign_negative() && !self.0.is_zero() {
            "-"
        } else {
            ""
        };
        let num = self.0.abs().to_f64().unwrap_or_default();
        format!("{sign}{}", format_num::format_num!(",.2", num))
    }
}

/// Returned when a string does not hold a recognizable amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountError(String);

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid amount", self.0)
    }
}

impl std::error::Error for AmountError {}

const CURRENCY_SYMBOLS: &str = "$€£¥₹";

impl FromStr for Amount {
    type Err = AmountError;

    /// Accepts one run of digits and separators, optionally surrounded by a currency marker and
    /// preceded by a single sign, e.g. `-R$ 5,00`, `R$ -5,00`, `20 €` or `12.50 BRL`. Anything
    /// else around or inside the number (dates, fractions, words) is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AmountError(s.to_string());
        let trimmed = s.trim();
        let start = trimmed.find(|c: char| c.is_ascii_digit()).ok_or_else(err)?;
        let end = trimmed[start..]
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
            .map_or(trimmed.len(), |i| start + i);
        let (prefix, number, suffix) = (&trimmed[..start], &trimmed[start..end], &trimmed[end..]);

        let mut negative = false;
        let mut signs = 0;
        let mut marker = String::new();
        for c in prefix.chars() {
            match c {
                '-' => {
                    negative = true;
                    signs += 1;
                }
                '+' => signs += 1,
                c if c.is_whitespace() => {}
                c => marker.push(c),
            }
        }
        if signs > 1 || !is_currency_marker(&marker) || !is_currency_marker(suffix.trim()) {
            return Err(err());
        }

        let normalized = normalize_separators(number).ok_or_else(err)?;
        let value = Decimal::from_str(&normalized).map_err(|_| err())?;
        Ok(Amount(if negative { -value } else { value }))
    }
}

/// Empty, a currency symbol, or a short upper case code like `R$`, `US$` or `BRL`.
fn is_currency_marker(s: &str) -> bool {
    s.chars().count() <= 4
        && s
            .chars()
            .all(|c| c.is_ascii_uppercase() || CURRENCY_SYMBOLS.contains(c))
}

/// Rewrites a digits-and-separators string so that `.` is the only, decimal, separator.
fn normalize_separators(s: &str) -> Option<String> {
    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');
    let out = match (last_comma, last_dot) {
        (None, None) => s.to_string(),
        // `1.234,56`: the later separator is the decimal one
        (Some(c), Some(d)) if c > d => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(c), None) => {
            let decimals = s.len() - c - 1;
            if s.matches(',').count() == 1 && decimals <= 2 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (None, Some(_)) => {
            if s.matches('.').count() > 1 {
                s.replace('.', "")
            } else {
                s.to_string()
            }
        }
    };
    if out.starts_with('.') || out.ends_with('.') || out.matches('.').count() > 1 {
        return None;
    }
    Some(out)
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0.round_dp(2))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount(value)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    /// Accepts both JSON strings and JSON numbers; language models produce either.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a string holding an amount")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Amount, E> {
                Amount::from_str(v).map_err(E::custom)
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount(Decimal::from(v)))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(Decimal::from(v)))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Amount, E> {
                // The shortest round-trip representation avoids binary noise like 20.1000000001
                Decimal::from_str(&v.to_string())
                    .map(Amount)
                    .map_err(|_| E::custom(format!("{v} is not a valid amount")))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(Amount::from_str("20").unwrap().value(), dec("20"));
        assert_eq!(Amount::from_str("20.5").unwrap().value(), dec("20.5"));
        assert_eq!(Amount::from_str("  7.25 ").unwrap().value(), dec("7.25"));
    }

    #[test]
    fn test_parse_currency_symbols() {
        assert_eq!(Amount::from_str("$50.00").unwrap().value(), dec("50.00"));
        assert_eq!(Amount::from_str("R$ 50,00").unwrap().value(), dec("50.00"));
        assert_eq!(Amount::from_str("-$4.50").unwrap().value(), dec("-4.50"));
    }

    #[test]
    fn test_parse_grouping() {
        assert_eq!(Amount::from_str("1,234.56").unwrap().value(), dec("1234.56"));
        assert_eq!(Amount::from_str("1.234,56").unwrap().value(), dec("1234.56"));
        assert_eq!(Amount::from_str("R$ 1.234,5").unwrap().value(), dec("1234.5"));
        assert_eq!(Amount::from_str("1,234").unwrap().value(), dec("1234"));
        assert_eq!(Amount::from_str("1.234.567").unwrap().value(), dec("1234567"));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Amount::from_str("").is_err());
        assert!(Amount::from_str("abc").is_err());
        assert!(Amount::from_str("R$").is_err());
        assert!(Amount::from_str("1.2.3,4.5").is_err());
        assert!(Amount::from_str("2025-01-05").is_err());
        assert!(Amount::from_str("01/02/2025").is_err());
        assert!(Amount::from_str("5 / 3").is_err());
        assert!(Amount::from_str("1 234,56").is_err());
        assert!(Amount::from_str("12abc").is_err());
        assert!(Amount::from_str("lunch 20").is_err());
        assert!(Amount::from_str("--5").is_err());
    }

    #[test]
    fn test_parse_sign_and_suffix() {
        assert_eq!(Amount::from_str("R$ -5,00").unwrap().value(), dec("-5.00"));
        assert_eq!(Amount::from_str("+7").unwrap().value(), dec("7"));
        assert_eq!(Amount::from_str("20 €").unwrap().value(), dec("20"));
        assert_eq!(Amount::from_str("12.50 BRL").unwrap().value(), dec("12.50"));
        assert_eq!(Amount::from_str("US$ 3").unwrap().value(), dec("3"));
    }

    #[test]
    fn test_checked_add() {
        let max = Amount::new(Decimal::MAX);
        assert_eq!(max.checked_add(Amount::new(dec("1"))), None);
        assert_eq!(
            Amount::new(dec("1.5")).checked_add(Amount::new(dec("2"))),
            Some(Amount::new(dec("3.5")))
        );
    }

    #[test]
    fn test_display_two_places() {
        assert_eq!(Amount::new(dec("25")).to_string(), "25.00");
        assert_eq!(Amount::new(dec("20.5")).to_string(), "20.50");
        assert_eq!(Amount::new(dec("-3.456")).to_string(), "-3.46");
    }

    #[test]
    fn test_grouped() {
        assert_eq!(Amount::new(dec("1234.5")).grouped(), "1,234.50");
        assert_eq!(Amount::new(dec("-60000")).grouped(), "-60,000.00");
    }

    #[test]
    fn test_sum() {
        let amounts = [Amount::new(dec("20")), Amount::new(dec("5.50"))];
        let total: Amount = amounts.iter().sum();
        assert_eq!(total.to_string(), "25.50");
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let a: Amount = serde_json::from_str("45.9").unwrap();
        assert_eq!(a.value(), dec("45.9"));
        let b: Amount = serde_json::from_str("12").unwrap();
        assert_eq!(b.value(), dec("12"));
        let c: Amount = serde_json::from_str("\"R$ 30,00\"").unwrap();
        assert_eq!(c.value(), dec("30.00"));
        assert!(serde_json::from_str::<Amount>("true").is_err());
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&Amount::new(dec("50"))).unwrap();
        assert_eq!(json, "\"50.00\"");
    }
}
