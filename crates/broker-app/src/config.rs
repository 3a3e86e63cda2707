//! Configuration for the wallet broker.
//!
//! The deployment interface is a fixed set of environment variables
//! (`INTERCOM_*` for the local endpoint, `SITE_INTERCOM_*` for the remote
//! wallet peer). Configuration is always carried as a plain record so
//! tests can construct brokers without touching the process environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Local Intercom2 endpoint.
    #[serde(default)]
    pub intercom: IntercomConfig,

    /// Remote wallet endpoint and ingestion settings.
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Local Intercom2 endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntercomConfig {
    /// 1 = plaintext TCP, 2 = mutual TLS.
    #[serde(default = "default_mode")]
    pub mode: u8,

    /// This endpoint's id.
    #[serde(default = "default_own_id")]
    pub id: u32,

    /// Local listen port (0 picks an ephemeral port).
    #[serde(default)]
    pub port: u16,

    /// Site name selecting the certificate subdirectory.
    #[serde(default)]
    pub sitename: String,

    /// Passphrase for encrypted private keys.
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Directory containing `cert/` (mutual TLS only).
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

impl Default for IntercomConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            id: default_own_id(),
            port: 0,
            sitename: String::new(),
            passphrase: None,
            config_dir: default_config_dir(),
        }
    }
}

/// Remote wallet endpoint and per-coin ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// The wallet peer's endpoint id.
    #[serde(default = "default_wallet_id")]
    pub id: u32,

    /// The wallet peer's host.
    #[serde(default = "default_wallet_host")]
    pub host: String,

    /// The wallet peer's port.
    #[serde(default = "default_wallet_port")]
    pub port: u16,

    /// Coin symbol this wallet serves.
    #[serde(default = "default_coin")]
    pub coin: String,

    /// Confirmations required before crediting.
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: i64,

    /// Fractional digits for balance amounts.
    #[serde(default = "default_decimal_precision")]
    pub decimal_precision: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            id: default_wallet_id(),
            host: default_wallet_host(),
            port: default_wallet_port(),
            coin: default_coin(),
            confirm_threshold: default_confirm_threshold(),
            decimal_precision: default_decimal_precision(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            intercom: IntercomConfig::default(),
            wallet: WalletConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (tests inject a
    /// map here instead of mutating the environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(mode) = lookup("INTERCOM_MODE").and_then(|v| v.parse().ok()) {
            config.intercom.mode = mode;
        }
        if let Some(id) = lookup("INTERCOM_ID").and_then(|v| v.parse().ok()) {
            config.intercom.id = id;
        }
        if let Some(port) = lookup("INTERCOM_PORT").and_then(|v| v.parse().ok()) {
            config.intercom.port = port;
        }
        if let Some(sitename) = lookup("INTERCOM_SITENAME") {
            config.intercom.sitename = sitename;
        }
        config.intercom.passphrase = lookup("INTERCOM_PASSPHRASE");

        if let Some(id) = lookup("SITE_INTERCOM_ID").and_then(|v| v.parse().ok()) {
            config.wallet.id = id;
        }
        if let Some(host) = lookup("SITE_INTERCOM_HOST") {
            config.wallet.host = host;
        }
        if let Some(port) = lookup("SITE_INTERCOM_PORT").and_then(|v| v.parse().ok()) {
            config.wallet.port = port;
        }

        config
    }
}

fn default_mode() -> u8 {
    1
}

fn default_own_id() -> u32 {
    1
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_wallet_id() -> u32 {
    2
}

fn default_wallet_host() -> String {
    "127.0.0.1".to_string()
}

fn default_wallet_port() -> u16 {
    7788
}

fn default_coin() -> String {
    "BTC".to_string()
}

fn default_confirm_threshold() -> i64 {
    3
}

fn default_decimal_precision() -> u32 {
    8
}

fn default_db_path() -> PathBuf {
    PathBuf::from("wallet-broker.db")
}
