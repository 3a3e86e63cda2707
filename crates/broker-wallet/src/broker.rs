//! The broker facade: outbound wallet commands and handler registration.

use crate::{BrokerError, CoinSettings, IngestPipeline, Result, StatusUpdater};
use broker_db::{AddressQueries, Database};
use broker_intercom::{EndpointId, Session};
use broker_proto::{decode_reply, MessageId, ReplyPayload, TransactionRequest};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Decoded reply to an outbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    /// Structured reply message (`isError` was false).
    Message(serde_json::Value),
    /// The reply did not parse; delivered as-is, informational.
    Raw(Vec<u8>),
}

impl CommandResponse {
    /// The message as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CommandResponse::Message(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandResponse::Message(serde_json::Value::String(s)) => write!(f, "{s}"),
            CommandResponse::Message(value) => write!(f, "{value}"),
            CommandResponse::Raw(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

fn message_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Site-side peer of one remote wallet process.
pub struct WalletBroker {
    session: Arc<Session>,
    db: Database,
    wallet_id: EndpointId,
    /// Coin symbol this wallet endpoint serves.
    coin: String,
    settings: CoinSettings,
}

impl WalletBroker {
    pub fn new(
        session: Arc<Session>,
        db: Database,
        wallet_id: EndpointId,
        coin: impl Into<String>,
        settings: CoinSettings,
    ) -> Self {
        Self {
            session,
            db,
            wallet_id,
            coin: coin.into(),
            settings,
        }
    }

    /// Register the NOTIFY and HEARTBEAT handlers on the session's
    /// dispatcher. Database work runs on the blocking pool.
    pub fn register_handlers(&self) {
        let ingest = IngestPipeline::new(self.db.clone(), self.settings.clone());
        self.session.dispatcher().register(
            MessageId::Notify.as_u16(),
            move |_, payload, mut reply| {
                let ingest = ingest.clone();
                async move {
                    let response =
                        match tokio::task::spawn_blocking(move || ingest.handle(&payload)).await {
                            Ok(response) => response,
                            Err(e) => {
                                error!("NOTIFY handler panicked: {e}");
                                return;
                            }
                        };
                    if let Err(e) = reply.send(response).await {
                        debug!("NOTIFY reply failed: {e}");
                    }
                }
            },
        );

        let status = StatusUpdater::new(self.db.clone());
        self.session.dispatcher().register(
            MessageId::Heartbeat.as_u16(),
            move |_, payload, mut reply| {
                let status = status.clone();
                async move {
                    let response =
                        match tokio::task::spawn_blocking(move || status.handle(&payload)).await {
                            Ok(response) => response,
                            Err(e) => {
                                error!("HEARTBEAT handler panicked: {e}");
                                return;
                            }
                        };
                    if let Err(e) = reply.send(response).await {
                        debug!("HEARTBEAT reply failed: {e}");
                    }
                }
            },
        );

        info!(wallet_id = self.wallet_id, coin = %self.coin, "wallet handlers registered");
    }

    /// Issue one command and decode the reply uniformly.
    async fn command(&self, message_id: MessageId, payload: Vec<u8>) -> Result<CommandResponse> {
        let reply = self.session.request(self.wallet_id, message_id, payload).await?;
        match decode_reply(&reply) {
            ReplyPayload::Structured(r) if r.is_error => {
                Err(BrokerError::Wallet(message_text(r.message)))
            }
            ReplyPayload::Structured(r) => Ok(CommandResponse::Message(r.message)),
            ReplyPayload::Raw(raw) => Ok(CommandResponse::Raw(raw)),
        }
    }

    pub async fn start(&self) -> Result<CommandResponse> {
        self.command(MessageId::Start, Vec::new()).await
    }

    pub async fn stop(&self) -> Result<CommandResponse> {
        self.command(MessageId::Stop, Vec::new()).await
    }

    pub async fn restart(&self) -> Result<CommandResponse> {
        self.command(MessageId::Restart, Vec::new()).await
    }

    pub async fn reindex(&self) -> Result<CommandResponse> {
        self.command(MessageId::Reindex, Vec::new()).await
    }

    pub async fn resync(&self) -> Result<CommandResponse> {
        self.command(MessageId::Resync, Vec::new()).await
    }

    pub async fn rescan(&self) -> Result<CommandResponse> {
        self.command(MessageId::Rescan, Vec::new()).await
    }

    pub async fn info(&self) -> Result<CommandResponse> {
        self.command(MessageId::Info, Vec::new()).await
    }

    pub async fn best_block_hash(&self) -> Result<CommandResponse> {
        self.command(MessageId::BestBlockHash, Vec::new()).await
    }

    /// Ask the wallet for a fresh deposit address for a user, and record
    /// the address-to-user mapping once it arrives.
    pub async fn new_address(&self, user_id: &str) -> Result<String> {
        let response = self
            .command(MessageId::NewAddress, user_id.as_bytes().to_vec())
            .await?;
        let address = response
            .as_str()
            .ok_or_else(|| BrokerError::Wallet(format!("unexpected new-address reply: {response}")))?
            .to_string();

        self.db
            .with_txn(|conn| conn.insert_address(&address, user_id, &self.coin))?;
        info!(user_id = %user_id, address = %address, "issued new address");
        Ok(address)
    }

    /// Addresses the wallet has issued for a user.
    pub async fn addresses(&self, user_id: &str) -> Result<CommandResponse> {
        self.command(MessageId::Addresses, user_id.as_bytes().to_vec())
            .await
    }

    pub async fn address_balance(&self, address: &str) -> Result<CommandResponse> {
        self.command(MessageId::AddressBalance, address.as_bytes().to_vec())
            .await
    }

    pub async fn id_balance(&self, user_id: &str) -> Result<CommandResponse> {
        self.command(MessageId::IdBalance, user_id.as_bytes().to_vec())
            .await
    }

    pub async fn send_funds(&self, request: &TransactionRequest) -> Result<CommandResponse> {
        let payload = serde_json::to_vec(request)?;
        self.command(MessageId::SendFunds, payload).await
    }

    /// Ask the wallet to re-emit NOTIFYs for a transaction.
    pub async fn replay(&self, txid: &str) -> Result<CommandResponse> {
        self.command(MessageId::Replay, txid.as_bytes().to_vec())
            .await
    }

    /// Ask the wallet to crawl from a block hash or height.
    pub async fn crawl(&self, target: &str) -> Result<CommandResponse> {
        self.command(MessageId::Crawl, target.as_bytes().to_vec())
            .await
    }
}
