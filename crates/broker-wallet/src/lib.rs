//! Wallet broker core: outbound command facade and inbound event pipelines.
//!
//! The [`WalletBroker`] issues imperative commands to the remote wallet
//! process over an Intercom2 [`broker_intercom::Session`] and registers the
//! two inbound handlers:
//!
//! - NOTIFY ([`ingest`]) — transaction observations, driven through a
//!   single database transaction per delivery with at-most-once crediting
//! - HEARTBEAT ([`heartbeat`]) — per-coin wallet status upserts

pub mod amount;
pub mod broker;
pub mod heartbeat;
pub mod ingest;

pub use broker::{CommandResponse, WalletBroker};
pub use heartbeat::StatusUpdater;
pub use ingest::IngestPipeline;

use thiserror::Error;

/// Minimum confirmations before a transaction is credited.
pub const DEFAULT_CONFIRM_THRESHOLD: i64 = 3;

/// Fractional digits carried by balances for a coin.
pub const DEFAULT_DECIMAL_PRECISION: u32 = 8;

/// Errors raised by the broker core.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("intercom error: {0}")]
    Intercom(#[from] broker_intercom::IntercomError),

    #[error("database error: {0}")]
    Db(#[from] broker_db::DbError),

    /// The wallet answered with `isError: true`.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// An integer amount string failed to parse.
    #[error("bad amount: {0}")]
    Amount(String),

    #[error("payload decode error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Per-coin ingestion settings.
#[derive(Debug, Clone)]
pub struct CoinSettings {
    /// Confirmations required before crediting.
    pub confirm_threshold: i64,
    /// Fractional digits for balance amounts.
    pub decimal_precision: u32,
}

impl Default for CoinSettings {
    fn default() -> Self {
        Self {
            confirm_threshold: DEFAULT_CONFIRM_THRESHOLD,
            decimal_precision: DEFAULT_DECIMAL_PRECISION,
        }
    }
}
