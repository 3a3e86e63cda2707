//! Database schema definitions.

/// Schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create the database schema.
///
/// `user_wallet_tx.userid` is the empty string (not NULL) on type-1 rows
/// so the composite unique index enforces at most one observation row per
/// txid; SQLite treats NULLs as distinct in unique indexes.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS storestate (
    statename TEXT PRIMARY KEY,
    state TEXT NOT NULL
);

-- Observed on-chain transactions and per-user credit entries.
-- txtype 1 = raw network observation, 3 = per-user credit entry.
CREATE TABLE IF NOT EXISTS user_wallet_tx (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    txid TEXT NOT NULL,
    blockhash TEXT NOT NULL DEFAULT '',
    cointype INTEGER NOT NULL DEFAULT 0,
    txtype INTEGER NOT NULL,
    confirms INTEGER NOT NULL DEFAULT 0,
    complete INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    userid TEXT NOT NULL DEFAULT '',
    amount TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS user_wallet_tx_key
    ON user_wallet_tx(txid, txtype, userid);
CREATE INDEX IF NOT EXISTS user_wallet_tx_user ON user_wallet_tx(userid);

-- Credit workflow bookkeeping, one job per observed txid.
-- state 0 = observed, 3 = attributed and processed.
CREATE TABLE IF NOT EXISTS user_wallet_job (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL UNIQUE,
    state INTEGER NOT NULL DEFAULT 0,
    type TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '',
    userid TEXT,
    result TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Wallet-issued deposit addresses mapped to site users.
CREATE TABLE IF NOT EXISTS user_wallet_address (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE,
    userid TEXT NOT NULL,
    coin TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS user_wallet_address_user ON user_wallet_address(userid);

-- Per-user spendable balance; the tx ledger is the source of truth.
CREATE TABLE IF NOT EXISTS user_wallet_balance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    userid TEXT NOT NULL UNIQUE,
    balance TEXT NOT NULL DEFAULT '0',
    updated_at INTEGER NOT NULL
);

-- Latest heartbeat snapshot per coin.
CREATE TABLE IF NOT EXISTS user_wallet_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL UNIQUE,
    online INTEGER NOT NULL DEFAULT 0,
    synced INTEGER NOT NULL DEFAULT 0,
    crawling INTEGER NOT NULL DEFAULT 0,
    blockheight INTEGER NOT NULL DEFAULT 0,
    blockhash TEXT NOT NULL DEFAULT '',
    blocktime INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);
"#;

/// State keys for the storestate table.
pub mod state_keys {
    pub const DATABASE_SCHEMA: &str = "databaseschema";
}
