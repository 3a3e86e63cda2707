//! Conversion of integer amount strings to fixed-point decimals.
//!
//! The wallet transmits amounts as integer strings in the coin's smallest
//! unit ("150000000" at precision 8 means 1.5). Balance math stays in
//! [`Decimal`] end to end; binary floating point is never involved.

use crate::{BrokerError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse an integer string in the smallest unit into a decimal with
/// `precision` fractional digits.
///
/// For a string of length `L`: if `L > precision` the last `precision`
/// digits are the fraction; otherwise the integer part is zero and the
/// string is left-padded with zeros to `precision` digits.
pub fn parse_int_string(s: &str, precision: u32) -> Result<Decimal> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BrokerError::Amount(format!(
            "expected unsigned integer string, got {s:?}"
        )));
    }

    let p = precision as usize;
    let text = if p == 0 {
        s.to_string()
    } else if s.len() > p {
        let (int_part, frac_part) = s.split_at(s.len() - p);
        format!("{int_part}.{frac_part}")
    } else {
        format!("0.{s:0>width$}", width = p)
    };

    Decimal::from_str(&text).map_err(|e| BrokerError::Amount(format!("{text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn longer_than_precision_splits() {
        assert_eq!(parse_int_string("150000000", 8).unwrap(), dec("1.50000000"));
        assert_eq!(parse_int_string("123456789012", 8).unwrap(), dec("1234.56789012"));
    }

    #[test]
    fn shorter_than_precision_pads() {
        assert_eq!(parse_int_string("1", 8).unwrap(), dec("0.00000001"));
        assert_eq!(parse_int_string("42", 8).unwrap(), dec("0.00000042"));
        assert_eq!(parse_int_string("12345678", 8).unwrap(), dec("0.12345678"));
    }

    #[test]
    fn zero_precision_is_the_identity() {
        assert_eq!(parse_int_string("150", 0).unwrap(), dec("150"));
    }

    #[test]
    fn zero_amount() {
        assert_eq!(parse_int_string("0", 8).unwrap(), dec("0.00000000"));
    }

    #[test]
    fn scale_is_preserved() {
        let parsed = parse_int_string("150000000", 8).unwrap();
        assert_eq!(parsed.scale(), 8);
        assert_eq!(parsed.to_string(), "1.50000000");
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse_int_string("", 8).is_err());
        assert!(parse_int_string("-5", 8).is_err());
        assert!(parse_int_string("1.5", 8).is_err());
        assert!(parse_int_string("12abc", 8).is_err());
    }

    proptest! {
        /// parse(s, p) * 10^p always equals s (modulo leading zeros).
        #[test]
        fn scaling_back_recovers_the_integer(
            s in "[0-9]{1,20}",
            p in 0u32..=12,
        ) {
            let parsed = parse_int_string(&s, p).unwrap();
            let scale = (0..p).fold(Decimal::ONE, |acc, _| acc * Decimal::TEN);
            let expected = Decimal::from_str(&s).unwrap();
            prop_assert_eq!(parsed * scale, expected);
        }

        #[test]
        fn never_panics_on_digit_strings(s in "[0-9]{1,20}", p in 0u32..=12) {
            let _ = parse_int_string(&s, p);
        }
    }
}
