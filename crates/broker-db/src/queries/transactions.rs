//! Queries over `user_wallet_tx`.

use super::parse_decimal;
use crate::{now_secs, DbError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

/// Raw network observation row.
pub const TX_TYPE_OBSERVATION: i32 = 1;
/// Per-user credit entry row.
pub const TX_TYPE_CREDIT: i32 = 3;

/// One row of `user_wallet_tx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRow {
    pub txid: String,
    pub blockhash: String,
    pub coin_type: i32,
    pub tx_type: i32,
    pub confirms: i64,
    pub complete: bool,
    pub processed: bool,
    /// `None` on observation rows.
    pub user_id: Option<String>,
    /// Credit amount; `None` on observation rows.
    pub amount: Option<Decimal>,
}

const TX_COLUMNS: &str =
    "txid, blockhash, cointype, txtype, confirms, complete, processed, userid, amount";

fn read_tx_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TxRow, Option<String>)> {
    let user_id: String = row.get(7)?;
    let amount_text: Option<String> = row.get(8)?;
    Ok((
        TxRow {
            txid: row.get(0)?,
            blockhash: row.get(1)?,
            coin_type: row.get(2)?,
            tx_type: row.get(3)?,
            confirms: row.get(4)?,
            complete: row.get::<_, i32>(5)? != 0,
            processed: row.get::<_, i32>(6)? != 0,
            user_id: if user_id.is_empty() { None } else { Some(user_id) },
            amount: None,
        },
        amount_text,
    ))
}

fn finish_tx_row((mut tx, amount_text): (TxRow, Option<String>)) -> Result<TxRow> {
    if let Some(text) = amount_text {
        tx.amount = Some(parse_decimal(&text, "user_wallet_tx.amount")?);
    }
    Ok(tx)
}

/// Trait for querying and storing wallet transactions.
pub trait TxQueries {
    /// Load the observation (type-1) row for a txid.
    fn find_tx_row(&self, txid: &str) -> Result<Option<TxRow>>;

    /// Insert the observation row if missing, otherwise raise `confirms`
    /// to at least `confirmations`. Confirms never decrease.
    fn upsert_tx_row(&self, txid: &str, confirmations: i64) -> Result<()>;

    /// Final per-NOTIFY update of the observation row: refresh confirms,
    /// latch `complete` and `processed`, record the blockhash once known.
    fn finalize_tx_row(
        &self,
        txid: &str,
        confirmations: i64,
        complete: bool,
        processed: bool,
        blockhash: Option<&str>,
    ) -> Result<()>;

    /// Insert a credit (type-3) row for `(txid, user)`.
    ///
    /// Fails with [`DbError::DuplicateCredit`] if one already exists.
    fn insert_credit_row(
        &self,
        txid: &str,
        user_id: &str,
        amount: &Decimal,
        confirmations: i64,
    ) -> Result<()>;

    /// All credit rows for a txid.
    fn credit_rows(&self, txid: &str) -> Result<Vec<TxRow>>;

    /// All rows for a user, newest first.
    fn rows_for_user(&self, user_id: &str) -> Result<Vec<TxRow>>;
}

impl TxQueries for Connection {
    fn find_tx_row(&self, txid: &str) -> Result<Option<TxRow>> {
        let found = self
            .query_row(
                &format!(
                    "SELECT {TX_COLUMNS} FROM user_wallet_tx WHERE txid = ?1 AND txtype = ?2"
                ),
                params![txid, TX_TYPE_OBSERVATION],
                read_tx_row,
            )
            .optional()?;
        found.map(finish_tx_row).transpose()
    }

    fn upsert_tx_row(&self, txid: &str, confirmations: i64) -> Result<()> {
        let now = now_secs();
        let updated = self.execute(
            "UPDATE user_wallet_tx
             SET confirms = MAX(confirms, ?2), updated_at = ?3
             WHERE txid = ?1 AND txtype = ?4",
            params![txid, confirmations, now, TX_TYPE_OBSERVATION],
        )?;
        if updated == 0 {
            self.execute(
                "INSERT INTO user_wallet_tx
                 (txid, blockhash, cointype, txtype, confirms, complete, processed,
                  userid, created_at, updated_at)
                 VALUES (?1, '', 0, ?2, ?3, 0, 0, '', ?4, ?4)",
                params![txid, TX_TYPE_OBSERVATION, confirmations, now],
            )?;
        }
        Ok(())
    }

    fn finalize_tx_row(
        &self,
        txid: &str,
        confirmations: i64,
        complete: bool,
        processed: bool,
        blockhash: Option<&str>,
    ) -> Result<()> {
        // `complete` and `processed` latch: once set they never revert.
        self.execute(
            "UPDATE user_wallet_tx
             SET confirms = MAX(confirms, ?2),
                 complete = CASE WHEN complete = 1 THEN 1 ELSE ?3 END,
                 processed = CASE WHEN processed = 1 THEN 1 ELSE ?4 END,
                 blockhash = COALESCE(?5, blockhash),
                 updated_at = ?6
             WHERE txid = ?1 AND txtype = ?7",
            params![
                txid,
                confirmations,
                complete as i32,
                processed as i32,
                blockhash,
                now_secs(),
                TX_TYPE_OBSERVATION
            ],
        )?;
        Ok(())
    }

    fn insert_credit_row(
        &self,
        txid: &str,
        user_id: &str,
        amount: &Decimal,
        confirmations: i64,
    ) -> Result<()> {
        let now = now_secs();
        self.execute(
            "INSERT INTO user_wallet_tx
             (txid, blockhash, cointype, txtype, confirms, complete, processed,
              userid, amount, created_at, updated_at)
             VALUES (?1, '', 0, ?2, ?3, 1, 1, ?4, ?5, ?6, ?6)",
            params![
                txid,
                TX_TYPE_CREDIT,
                confirmations,
                user_id,
                amount.to_string(),
                now
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::DuplicateCredit {
                    txid: txid.to_string(),
                    user_id: user_id.to_string(),
                }
            }
            other => DbError::Sqlite(other),
        })?;
        Ok(())
    }

    fn credit_rows(&self, txid: &str) -> Result<Vec<TxRow>> {
        let mut stmt = self.prepare(&format!(
            "SELECT {TX_COLUMNS} FROM user_wallet_tx
             WHERE txid = ?1 AND txtype = ?2 ORDER BY userid"
        ))?;
        let rows = stmt.query_map(params![txid, TX_TYPE_CREDIT], read_tx_row)?;
        rows.map(|r| finish_tx_row(r?)).collect()
    }

    fn rows_for_user(&self, user_id: &str) -> Result<Vec<TxRow>> {
        let mut stmt = self.prepare(&format!(
            "SELECT {TX_COLUMNS} FROM user_wallet_tx
             WHERE userid = ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], read_tx_row)?;
        rows.map(|r| finish_tx_row(r?)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use std::str::FromStr;

    #[test]
    fn upsert_inserts_then_raises_confirms() {
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| {
            conn.upsert_tx_row("T1", 0)?;
            let row = conn.find_tx_row("T1")?.unwrap();
            assert_eq!(row.confirms, 0);
            assert!(!row.complete);
            assert!(row.user_id.is_none());

            conn.upsert_tx_row("T1", 5)?;
            assert_eq!(conn.find_tx_row("T1")?.unwrap().confirms, 5);

            // Lower confirmations never regress the row.
            conn.upsert_tx_row("T1", 2)?;
            assert_eq!(conn.find_tx_row("T1")?.unwrap().confirms, 5);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn finalize_latches_complete() {
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| {
            conn.upsert_tx_row("T1", 5)?;
            conn.finalize_tx_row("T1", 5, true, true, Some("H"))?;
            let row = conn.find_tx_row("T1")?.unwrap();
            assert!(row.complete);
            assert!(row.processed);
            assert_eq!(row.blockhash, "H");

            conn.finalize_tx_row("T1", 2, false, false, None)?;
            let row = conn.find_tx_row("T1")?.unwrap();
            assert!(row.complete, "complete must not revert");
            assert!(row.processed, "processed must not revert");
            assert_eq!(row.confirms, 5, "confirms must not decrease");
            assert_eq!(row.blockhash, "H", "blockhash survives absent update");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn duplicate_credit_is_distinguishable() {
        let db = Database::open_in_memory().unwrap();
        let amount = Decimal::from_str("1.50000000").unwrap();
        db.with_txn(|conn| conn.insert_credit_row("T1", "U1", &amount, 3))
            .unwrap();

        let err = db
            .with_txn(|conn| conn.insert_credit_row("T1", "U1", &amount, 3))
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateCredit { .. }));

        // A different user for the same txid is fine.
        db.with_txn(|conn| conn.insert_credit_row("T1", "U2", &amount, 3))
            .unwrap();
        let credits = db.with_conn(|conn| conn.credit_rows("T1")).unwrap();
        assert_eq!(credits.len(), 2);
        assert_eq!(credits[0].amount, Some(amount));
    }

    #[test]
    fn observation_and_credit_rows_coexist() {
        let db = Database::open_in_memory().unwrap();
        let amount = Decimal::from_str("0.00000001").unwrap();
        db.with_txn(|conn| {
            conn.upsert_tx_row("T1", 3)?;
            conn.insert_credit_row("T1", "U1", &amount, 3)?;
            Ok(())
        })
        .unwrap();

        let rows = db.with_conn(|conn| conn.rows_for_user("U1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tx_type, TX_TYPE_CREDIT);
    }
}
