//! Queries over `user_wallet_status`.

use crate::{now_secs, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Latest heartbeat snapshot for one coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    /// Coin symbol.
    pub coin: String,
    pub online: bool,
    pub synced: bool,
    pub crawling: bool,
    pub blockheight: i64,
    pub blockhash: String,
    pub blocktime: i64,
    pub updated_at: i64,
}

/// Trait for per-coin wallet status.
pub trait StatusQueries {
    /// Upsert the snapshot for `row.coin`, stamping `updated_at` with the
    /// current time. Last writer wins.
    fn upsert_status(&self, row: &StatusRow) -> Result<()>;

    fn load_status(&self, coin: &str) -> Result<Option<StatusRow>>;
}

impl StatusQueries for Connection {
    fn upsert_status(&self, row: &StatusRow) -> Result<()> {
        self.execute(
            "INSERT INTO user_wallet_status
             (type, online, synced, crawling, blockheight, blockhash, blocktime, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(type) DO UPDATE SET
                 online = excluded.online,
                 synced = excluded.synced,
                 crawling = excluded.crawling,
                 blockheight = excluded.blockheight,
                 blockhash = excluded.blockhash,
                 blocktime = excluded.blocktime,
                 updated_at = excluded.updated_at",
            params![
                row.coin,
                row.online as i32,
                row.synced as i32,
                row.crawling as i32,
                row.blockheight,
                row.blockhash,
                row.blocktime,
                now_secs(),
            ],
        )?;
        Ok(())
    }

    fn load_status(&self, coin: &str) -> Result<Option<StatusRow>> {
        Ok(self
            .query_row(
                "SELECT type, online, synced, crawling, blockheight, blockhash, blocktime, updated_at
                 FROM user_wallet_status WHERE type = ?1",
                params![coin],
                |row| {
                    Ok(StatusRow {
                        coin: row.get(0)?,
                        online: row.get::<_, i32>(1)? != 0,
                        synced: row.get::<_, i32>(2)? != 0,
                        crawling: row.get::<_, i32>(3)? != 0,
                        blockheight: row.get(4)?,
                        blockhash: row.get(5)?,
                        blocktime: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn snapshot(coin: &str, height: i64) -> StatusRow {
        StatusRow {
            coin: coin.to_string(),
            online: true,
            synced: true,
            crawling: false,
            blockheight: height,
            blockhash: format!("H{height}"),
            blocktime: 1_700_000_000,
            updated_at: 0,
        }
    }

    #[test]
    fn second_heartbeat_wins() {
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| conn.upsert_status(&snapshot("X", 900))).unwrap();
        db.with_txn(|conn| conn.upsert_status(&snapshot("X", 901))).unwrap();

        let row = db.with_conn(|conn| conn.load_status("X")).unwrap().unwrap();
        assert_eq!(row.blockheight, 901);
        assert_eq!(row.blockhash, "H901");

        // Still exactly one row for the coin.
        db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM user_wallet_status", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn coins_do_not_collide() {
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| {
            conn.upsert_status(&snapshot("X", 1))?;
            conn.upsert_status(&snapshot("Y", 2))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            db.with_conn(|conn| conn.load_status("Y")).unwrap().unwrap().blockheight,
            2
        );
    }
}
