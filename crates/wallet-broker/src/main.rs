//! wallet-broker - custodial-wallet integration broker
//!
//! This binary runs the site-side broker daemon that talks to a remote
//! wallet process over Intercom2, and provides one-shot subcommands for
//! every wallet command.
//!
//! ## Usage
//!
//! ```text
//! wallet-broker run                  # Run the broker daemon
//! wallet-broker new-db               # Create the database
//! wallet-broker info                 # Query wallet info
//! wallet-broker new-address U123     # Issue a deposit address
//! wallet-broker send-funds U123 addr 150000000
//! ```
//!
//! ## Configuration
//!
//! Endpoint identity and the wallet peer are read from the environment
//! (`INTERCOM_*`, `SITE_INTERCOM_*`); the database path and coin symbol
//! can be overridden with global flags.

mod run_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use broker_app::{logging, BrokerConfig, LogConfig, LogFormat};
use run_cmd::WalletCommand;

/// Custodial-wallet integration broker
#[derive(Parser)]
#[command(name = "wallet-broker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the broker database
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Coin symbol the wallet endpoint serves
    #[arg(long, global = true)]
    coin: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    log_format: CliLogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Log output format for CLI
#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum CliLogFormat {
    #[default]
    Text,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the broker daemon
    Run,

    /// Create (or migrate) the database and exit
    NewDb,

    /// Start the wallet's network watcher
    Start,
    /// Stop the wallet's network watcher
    Stop,
    /// Restart the wallet's network watcher
    Restart,
    /// Rebuild the wallet's chain index
    Reindex,
    /// Resynchronize the wallet from scratch
    Resync,
    /// Rescan the chain for wallet transactions
    Rescan,
    /// Query wallet info
    Info,
    /// Query the wallet's best block hash
    BestBlockHash,

    /// Issue a new deposit address for a user
    NewAddress {
        /// Site user id
        user_id: String,
    },
    /// List the wallet's addresses for a user
    Addresses {
        user_id: String,
    },
    /// Query the balance of one address
    AddressBalance {
        address: String,
    },
    /// Query the wallet-side balance of a user
    IdBalance {
        user_id: String,
    },
    /// Send funds out of the wallet
    SendFunds {
        user_id: String,
        to_address: String,
        /// Integer amount in the coin's smallest unit
        amount: String,
    },
    /// Re-emit NOTIFYs for a transaction
    Replay {
        txid: String,
    },
    /// Crawl from a block hash or height
    Crawl {
        /// Block hash or height as a string
        target: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    log_config.format = cli.log_format.into();
    logging::init(&log_config)?;

    let mut config = BrokerConfig::from_env();
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Some(coin) = cli.coin {
        config.wallet.coin = coin;
    }

    match cli.command {
        Commands::Run => run_cmd::run_node(config).await,
        Commands::NewDb => run_cmd::new_db(config),
        Commands::Start => run_cmd::run_wallet_command(config, WalletCommand::Start).await,
        Commands::Stop => run_cmd::run_wallet_command(config, WalletCommand::Stop).await,
        Commands::Restart => run_cmd::run_wallet_command(config, WalletCommand::Restart).await,
        Commands::Reindex => run_cmd::run_wallet_command(config, WalletCommand::Reindex).await,
        Commands::Resync => run_cmd::run_wallet_command(config, WalletCommand::Resync).await,
        Commands::Rescan => run_cmd::run_wallet_command(config, WalletCommand::Rescan).await,
        Commands::Info => run_cmd::run_wallet_command(config, WalletCommand::Info).await,
        Commands::BestBlockHash => {
            run_cmd::run_wallet_command(config, WalletCommand::BestBlockHash).await
        }
        Commands::NewAddress { user_id } => {
            run_cmd::run_wallet_command(config, WalletCommand::NewAddress { user_id }).await
        }
        Commands::Addresses { user_id } => {
            run_cmd::run_wallet_command(config, WalletCommand::Addresses { user_id }).await
        }
        Commands::AddressBalance { address } => {
            run_cmd::run_wallet_command(config, WalletCommand::AddressBalance { address }).await
        }
        Commands::IdBalance { user_id } => {
            run_cmd::run_wallet_command(config, WalletCommand::IdBalance { user_id }).await
        }
        Commands::SendFunds {
            user_id,
            to_address,
            amount,
        } => {
            run_cmd::run_wallet_command(
                config,
                WalletCommand::SendFunds {
                    user_id,
                    to_address,
                    amount,
                },
            )
            .await
        }
        Commands::Replay { txid } => {
            run_cmd::run_wallet_command(config, WalletCommand::Replay { txid }).await
        }
        Commands::Crawl { target } => {
            run_cmd::run_wallet_command(config, WalletCommand::Crawl { target }).await
        }
    }
}
