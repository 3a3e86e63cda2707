//! Queries over `user_wallet_address`.

use crate::{now_secs, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// One row of `user_wallet_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRow {
    pub address: String,
    pub user_id: String,
    pub coin: String,
}

/// Trait for the address-to-user mapping.
pub trait AddressQueries {
    fn find_address(&self, address: &str) -> Result<Option<AddressRow>>;

    /// Record a wallet-issued address for a user (new-address flow).
    fn insert_address(&self, address: &str, user_id: &str, coin: &str) -> Result<()>;

    /// All addresses issued to a user for a coin.
    fn addresses_for_user(&self, user_id: &str, coin: &str) -> Result<Vec<AddressRow>>;
}

impl AddressQueries for Connection {
    fn find_address(&self, address: &str) -> Result<Option<AddressRow>> {
        Ok(self
            .query_row(
                "SELECT address, userid, coin FROM user_wallet_address WHERE address = ?1",
                params![address],
                |row| {
                    Ok(AddressRow {
                        address: row.get(0)?,
                        user_id: row.get(1)?,
                        coin: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn insert_address(&self, address: &str, user_id: &str, coin: &str) -> Result<()> {
        self.execute(
            "INSERT INTO user_wallet_address (address, userid, coin, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![address, user_id, coin, now_secs()],
        )?;
        Ok(())
    }

    fn addresses_for_user(&self, user_id: &str, coin: &str) -> Result<Vec<AddressRow>> {
        let mut stmt = self.prepare(
            "SELECT address, userid, coin FROM user_wallet_address
             WHERE userid = ?1 AND coin = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id, coin], |row| {
            Ok(AddressRow {
                address: row.get(0)?,
                user_id: row.get(1)?,
                coin: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
