use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Decimal-string amount used everywhere in the gateway (§3, §9 "Decimal
/// arithmetic"). Never a float: all comparisons happen in the same base
/// units after both sides have been scaled by the token's canonical decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(Decimal);

impl Amount {
    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn from_decimal(d: Decimal) -> Self {
        Amount(d)
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }

    /// Parses a decimal string matching `^\d+(\.\d+)?$` (§6 inbound validation).
    pub fn parse(s: &str) -> Result<Self, AmountParseError> {
        if !is_unsigned_decimal(s) {
            return Err(AmountParseError(s.to_string()));
        }
        Decimal::from_str(s)
            .map(Amount)
            .map_err(|_| AmountParseError(s.to_string()))
    }

    /// True if `self` and `expected` agree within the tolerance defined in
    /// §4.3.1: `|amount - expected| <= 0.01 * 10^(-decimals+2)` scaled to the
    /// token's decimals, i.e. within one hundredth of a unit regardless of
    /// how many base-unit decimals the chain uses.
    pub fn matches_expected(&self, expected: &Amount, decimals: u32) -> bool {
        let tolerance = Decimal::new(1, decimals); // 0.01 * 10^(-decimals+2) == 10^-decimals
        (self.0 - expected.0).abs() <= tolerance
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }
}

fn is_unsigned_decimal(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if let Some(frac) = parts.next() {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    true
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid decimal amount: {0}")]
pub struct AmountParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_expected_uses_per_token_decimals_not_a_flat_cent() {
        let expected = Amount::parse("10").unwrap();

        // 6-decimal USDT: tolerance is 10^-6, so a cent off must not match.
        let off_by_a_cent = Amount::parse("10.01").unwrap();
        assert!(!off_by_a_cent.matches_expected(&expected, 6));
        let within_tolerance = Amount::parse("10.0000001").unwrap();
        assert!(within_tolerance.matches_expected(&expected, 6));

        // 18-decimal BSC/BUSD: tolerance is 10^-18.
        let off_by_a_cent_18 = Amount::parse("10.01").unwrap();
        assert!(!off_by_a_cent_18.matches_expected(&expected, 18));
        let within_tolerance_18 = Amount::parse("10").unwrap();
        assert!(within_tolerance_18.matches_expected(&expected, 18));
    }
}
