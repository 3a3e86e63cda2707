//! Command implementations for the wallet-broker CLI.
//!
//! `run` starts the daemon and blocks until Ctrl-C. The wallet
//! subcommands bring up a short-lived session, wait for the endpoint to
//! connect, issue one command, print the result, and shut down.

use std::time::Duration;

use anyhow::Context;
use broker_app::{App, BrokerConfig};
use broker_db::Database;
use broker_intercom::IntercomError;
use broker_proto::TransactionRequest;
use broker_wallet::{BrokerError, CommandResponse, WalletBroker};
use tracing::info;

/// How long a one-shot CLI command waits for the wallet endpoint.
const COMMAND_DEADLINE: Duration = Duration::from_secs(15);

/// Run the broker daemon until Ctrl-C.
pub async fn run_node(config: BrokerConfig) -> anyhow::Result<()> {
    let app = App::build(config)?;
    app.start().await?;
    app.run_until_shutdown().await
}

/// Create (or migrate) the database and exit.
pub fn new_db(config: BrokerConfig) -> anyhow::Result<()> {
    Database::open(&config.database.path).context("creating database")?;
    info!(path = %config.database.path.display(), "database ready");
    println!("database ready: {}", config.database.path.display());
    Ok(())
}

/// One-shot wallet commands.
pub enum WalletCommand {
    Start,
    Stop,
    Restart,
    Reindex,
    Resync,
    Rescan,
    Info,
    BestBlockHash,
    NewAddress { user_id: String },
    Addresses { user_id: String },
    AddressBalance { address: String },
    IdBalance { user_id: String },
    SendFunds { user_id: String, to_address: String, amount: String },
    Replay { txid: String },
    Crawl { target: String },
}

/// Bring up the app, issue one command, print the reply, shut down.
pub async fn run_wallet_command(config: BrokerConfig, command: WalletCommand) -> anyhow::Result<()> {
    let coin = config.wallet.coin.clone();
    let app = App::build(config)?;
    app.start().await?;

    let result = issue(app.broker(), &coin, command).await;
    app.shutdown().await;

    match result {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn issue(
    broker: &WalletBroker,
    coin: &str,
    command: WalletCommand,
) -> Result<String, BrokerError> {
    let deadline = tokio::time::Instant::now() + COMMAND_DEADLINE;
    loop {
        let attempt: Result<String, BrokerError> = match &command {
            WalletCommand::Start => broker.start().await.map(print_response),
            WalletCommand::Stop => broker.stop().await.map(print_response),
            WalletCommand::Restart => broker.restart().await.map(print_response),
            WalletCommand::Reindex => broker.reindex().await.map(print_response),
            WalletCommand::Resync => broker.resync().await.map(print_response),
            WalletCommand::Rescan => broker.rescan().await.map(print_response),
            WalletCommand::Info => broker.info().await.map(print_response),
            WalletCommand::BestBlockHash => broker.best_block_hash().await.map(print_response),
            WalletCommand::NewAddress { user_id } => broker.new_address(user_id).await,
            WalletCommand::Addresses { user_id } => {
                broker.addresses(user_id).await.map(print_response)
            }
            WalletCommand::AddressBalance { address } => {
                broker.address_balance(address).await.map(print_response)
            }
            WalletCommand::IdBalance { user_id } => {
                broker.id_balance(user_id).await.map(print_response)
            }
            WalletCommand::SendFunds {
                user_id,
                to_address,
                amount,
            } => {
                let request = TransactionRequest {
                    user_id: user_id.clone(),
                    coin: coin.to_string(),
                    to_address: to_address.clone(),
                    amount: amount.clone(),
                };
                broker.send_funds(&request).await.map(print_response)
            }
            WalletCommand::Replay { txid } => broker.replay(txid).await.map(print_response),
            WalletCommand::Crawl { target } => broker.crawl(target).await.map(print_response),
        };

        match attempt {
            // The endpoint connects in the background; retry until the
            // deadline instead of failing the first attempt.
            Err(BrokerError::Intercom(IntercomError::NotConnected(_)))
                if tokio::time::Instant::now() < deadline =>
            {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            other => return other,
        }
    }
}

fn print_response(response: CommandResponse) -> String {
    response.to_string()
}
