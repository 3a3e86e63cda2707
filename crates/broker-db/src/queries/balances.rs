//! Queries over `user_wallet_balance`.
//!
//! Balances are stored as decimal TEXT and handled as
//! [`rust_decimal::Decimal`]; they are mutated only by additive credits
//! from the ingestion pipeline.

use super::parse_decimal;
use crate::{now_secs, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

/// Trait for per-user balances.
pub trait BalanceQueries {
    /// Load a user's balance, creating a zero row if absent.
    fn get_or_init_balance(&self, user_id: &str) -> Result<Decimal>;

    /// Add `amount` to a user's balance, creating the row if absent.
    /// Returns the new balance.
    fn add_to_balance(&self, user_id: &str, amount: &Decimal) -> Result<Decimal>;

    /// Load a user's balance without creating it.
    fn load_balance(&self, user_id: &str) -> Result<Option<Decimal>>;
}

impl BalanceQueries for Connection {
    fn get_or_init_balance(&self, user_id: &str) -> Result<Decimal> {
        self.execute(
            "INSERT OR IGNORE INTO user_wallet_balance (userid, balance, updated_at)
             VALUES (?1, '0', ?2)",
            params![user_id, now_secs()],
        )?;
        let text: String = self.query_row(
            "SELECT balance FROM user_wallet_balance WHERE userid = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        parse_decimal(&text, "user_wallet_balance.balance")
    }

    fn add_to_balance(&self, user_id: &str, amount: &Decimal) -> Result<Decimal> {
        let current = self.get_or_init_balance(user_id)?;
        let next = current + amount;
        self.execute(
            "UPDATE user_wallet_balance SET balance = ?2, updated_at = ?3 WHERE userid = ?1",
            params![user_id, next.to_string(), now_secs()],
        )?;
        Ok(next)
    }

    fn load_balance(&self, user_id: &str) -> Result<Option<Decimal>> {
        let text: Option<String> = self
            .query_row(
                "SELECT balance FROM user_wallet_balance WHERE userid = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        text.map(|t| parse_decimal(&t, "user_wallet_balance.balance"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn init_starts_at_zero() {
        let db = Database::open_in_memory().unwrap();
        let balance = db.with_txn(|conn| conn.get_or_init_balance("U1")).unwrap();
        assert_eq!(balance, Decimal::ZERO);
        assert!(db.with_conn(|conn| conn.load_balance("U2")).unwrap().is_none());
    }

    #[test]
    fn credits_accumulate_exactly() {
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| {
            conn.add_to_balance("U1", &dec("1.50000000"))?;
            let next = conn.add_to_balance("U1", &dec("0.00000001"))?;
            assert_eq!(next, dec("1.50000001"));
            Ok(())
        })
        .unwrap();

        let stored = db.with_conn(|conn| conn.load_balance("U1")).unwrap().unwrap();
        assert_eq!(stored, dec("1.50000001"));
    }

    #[test]
    fn precision_survives_storage() {
        // A value that binary floats cannot represent exactly.
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| {
            for _ in 0..10 {
                conn.add_to_balance("U1", &dec("0.10000000"))?;
            }
            Ok(())
        })
        .unwrap();
        let stored = db.with_conn(|conn| conn.load_balance("U1")).unwrap().unwrap();
        assert_eq!(stored, dec("1.00000000"));
    }
}
