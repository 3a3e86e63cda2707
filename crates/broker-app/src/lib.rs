//! Application layer for the wallet broker: configuration, logging, and
//! lifecycle wiring. The binary crate stays thin; everything it needs is
//! re-exported here.

pub mod app;
pub mod config;
pub mod logging;

pub use app::{App, HANDLER_SHUTDOWN_GRACE};
pub use config::{BrokerConfig, DatabaseConfig, IntercomConfig, WalletConfig};
pub use logging::{LogConfig, LogFormat};
