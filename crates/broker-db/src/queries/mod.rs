//! Per-table query traits implemented on [`rusqlite::Connection`].

pub mod addresses;
pub mod balances;
pub mod jobs;
pub mod status;
pub mod transactions;

use crate::{DbError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a stored decimal column, attributing failures to `column`.
pub(crate) fn parse_decimal(text: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(text)
        .map_err(|e| DbError::Integrity(format!("bad decimal in {column}: {text:?} ({e})")))
}
