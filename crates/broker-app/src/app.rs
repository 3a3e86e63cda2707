//! Application wiring and lifecycle.
//!
//! [`App::build`] constructs the database, session, and broker from a
//! [`BrokerConfig`]; [`App::start`] binds the listener and begins
//! connecting to the wallet peer. Failing to load TLS material or to bind
//! the listener is fatal; everything else is recoverable at runtime.

use crate::config::BrokerConfig;
use anyhow::Context;
use broker_db::Database;
use broker_intercom::{
    Dispatcher, EndpointAddress, SecurityMode, Session, SessionConfig, TlsContext,
};
use broker_wallet::{CoinSettings, WalletBroker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long in-flight inbound handlers may finish their database work
/// after shutdown begins.
pub const HANDLER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The assembled broker application.
pub struct App {
    config: BrokerConfig,
    db: Database,
    session: Arc<Session>,
    broker: Arc<WalletBroker>,
}

impl App {
    /// Build the application from configuration. Opens the database and
    /// loads TLS material; does not touch the network yet.
    pub fn build(config: BrokerConfig) -> anyhow::Result<Self> {
        let security = match config.intercom.mode {
            1 => SecurityMode::Plaintext,
            2 => {
                let tls = TlsContext::load(
                    &config.intercom.config_dir,
                    &config.intercom.sitename,
                    config.intercom.passphrase.as_deref(),
                )
                .context("loading TLS material")?;
                SecurityMode::MutualTls(Arc::new(tls))
            }
            other => anyhow::bail!("unsupported INTERCOM_MODE {other}"),
        };

        let db = Database::open(&config.database.path).context("opening database")?;

        let mut session_config = SessionConfig::new(config.intercom.id);
        session_config.listen_addr = Some(SocketAddr::from(([0, 0, 0, 0], config.intercom.port)));
        session_config.security = security;
        let session = Arc::new(Session::new(session_config, Arc::new(Dispatcher::default())));

        let broker = Arc::new(WalletBroker::new(
            session.clone(),
            db.clone(),
            config.wallet.id,
            config.wallet.coin.clone(),
            CoinSettings {
                confirm_threshold: config.wallet.confirm_threshold,
                decimal_precision: config.wallet.decimal_precision,
            },
        ));
        broker.register_handlers();

        Ok(Self {
            config,
            db,
            session,
            broker,
        })
    }

    /// Bind the listener and start connecting to the wallet endpoint.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.session.start().await.context("binding listener")?;
        self.session.add_endpoint(EndpointAddress::new(
            self.config.wallet.id,
            self.config.wallet.host.clone(),
            self.config.wallet.port,
        ));
        info!(
            own_id = self.config.intercom.id,
            wallet_id = self.config.wallet.id,
            coin = %self.config.wallet.coin,
            "broker started"
        );
        Ok(())
    }

    /// Block until Ctrl-C, then shut down gracefully.
    pub async fn run_until_shutdown(&self) -> anyhow::Result<()> {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        info!("shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    /// Close all endpoints (cancelling pending requests) and give
    /// in-flight handlers a bounded grace period to finish.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        if !self.session.dispatcher().drain(HANDLER_SHUTDOWN_GRACE).await {
            warn!("handlers still running after shutdown grace; terminating");
        }
        info!("broker stopped");
    }

    pub fn broker(&self) -> &Arc<WalletBroker> {
        &self.broker
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}
