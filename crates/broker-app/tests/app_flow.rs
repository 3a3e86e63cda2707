//! Whole-application flow tests: a real broker app talking to a fake
//! wallet endpoint over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use broker_app::{App, BrokerConfig};
use broker_db::{AddressQueries, BalanceQueries, StatusQueries};
use broker_intercom::{Dispatcher, EndpointAddress, IntercomError, Session, SessionConfig};
use broker_proto::{CommandReply, MessageId};
use broker_wallet::BrokerError;
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::time::timeout;

/// A fake wallet process: listens, answers commands, can push events.
async fn fake_wallet() -> Arc<Session> {
    let dispatcher = Arc::new(Dispatcher::default());

    dispatcher.register(MessageId::Info.as_u16(), |_, _, mut reply| async move {
        let body = serde_json::to_vec(&CommandReply::ok("wallet v1")).unwrap();
        reply.send(body).await.unwrap();
    });
    dispatcher.register(MessageId::Start.as_u16(), |_, _, mut reply| async move {
        // Free-form reply: exercises the raw-payload fallback.
        reply.send(b"okay".to_vec()).await.unwrap();
    });
    dispatcher.register(MessageId::Stop.as_u16(), |_, _, mut reply| async move {
        let body = serde_json::to_vec(&CommandReply::error("not running")).unwrap();
        reply.send(body).await.unwrap();
    });
    dispatcher.register(MessageId::NewAddress.as_u16(), |_, payload, mut reply| async move {
        let user = String::from_utf8_lossy(&payload).to_string();
        let body = serde_json::to_vec(&CommandReply::ok(format!("ADDR_{user}"))).unwrap();
        reply.send(body).await.unwrap();
    });

    let mut config = SessionConfig::new(2);
    config.listen_addr = Some("127.0.0.1:0".parse().unwrap());
    let session = Arc::new(Session::new(config, dispatcher));
    session.start().await.expect("wallet session start");
    session
}

fn app_config(db_path: std::path::PathBuf, wallet_port: u16) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.intercom.id = 1;
    config.intercom.port = 0;
    config.wallet.id = 2;
    config.wallet.host = "127.0.0.1".to_string();
    config.wallet.port = wallet_port;
    config.wallet.coin = "X".to_string();
    config.database.path = db_path;
    config
}

/// Retry a broker command until the outbound endpoint connects.
async fn with_retry<T, F, Fut>(mut call: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BrokerError>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match call().await {
            Err(BrokerError::Intercom(IntercomError::NotConnected(_)))
                if tokio::time::Instant::now() < deadline =>
            {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other,
        }
    }
}

async fn request_with_retry(
    session: &Session,
    remote_id: u32,
    message_id: MessageId,
    payload: Vec<u8>,
) -> Result<Vec<u8>, IntercomError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match session.request(remote_id, message_id, payload.clone()).await {
            Err(IntercomError::NotConnected(_)) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other,
        }
    }
}

#[tokio::test]
async fn commands_follow_the_uniform_reply_rule() {
    let wallet = fake_wallet().await;
    let wallet_port = wallet.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let app = App::build(app_config(dir.path().join("broker.db"), wallet_port)).unwrap();
    app.start().await.unwrap();
    let broker = app.broker().clone();

    // Structured success.
    let info = timeout(Duration::from_secs(10), with_retry(|| broker.info()))
        .await
        .expect("test deadline")
        .expect("info");
    assert_eq!(info.as_str(), Some("wallet v1"));

    // Unparseable reply delivered raw.
    let started = broker.start().await.expect("start");
    assert_eq!(started.to_string(), "okay");

    // Structured error surfaces as a failure.
    let stopped = broker.stop().await;
    assert!(matches!(stopped, Err(BrokerError::Wallet(msg)) if msg == "not running"));

    // New-address flow records the mapping.
    let address = broker.new_address("U9").await.expect("new address");
    assert_eq!(address, "ADDR_U9");
    let mapped = app
        .database()
        .with_conn(|conn| conn.find_address("ADDR_U9"))
        .unwrap()
        .unwrap();
    assert_eq!(mapped.user_id, "U9");
    assert_eq!(mapped.coin, "X");

    app.shutdown().await;
    wallet.shutdown().await;
}

#[tokio::test]
async fn wallet_events_become_durable_state() {
    let wallet = fake_wallet().await;
    let wallet_port = wallet.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let app = App::build(app_config(dir.path().join("broker.db"), wallet_port)).unwrap();
    app.start().await.unwrap();
    let broker_port = app.session().local_addr().unwrap().port();

    // The wallet dials the broker back for its event stream.
    wallet.add_endpoint(EndpointAddress::new(1, "127.0.0.1", broker_port));

    // Precondition: user U1 owns address A1.
    app.database()
        .with_txn(|conn| conn.insert_address("A1", "U1", "X"))
        .unwrap();

    let notify = serde_json::json!({
        "txid": "T1",
        "coin": "X",
        "confirmations": 3,
        "balances": [{"address": "A1", "balance": "150000000"}]
    });
    let reply = timeout(
        Duration::from_secs(10),
        request_with_retry(
            &wallet,
            1,
            MessageId::Notify,
            serde_json::to_vec(&notify).unwrap(),
        ),
    )
    .await
    .expect("test deadline")
    .expect("notify");
    assert_eq!(reply, b"Received NOTIFY");

    let balance = app
        .database()
        .with_conn(|conn| conn.load_balance("U1"))
        .unwrap()
        .unwrap();
    assert_eq!(balance, Decimal::from_str("1.50000000").unwrap());

    let heartbeat = serde_json::json!({
        "coin": "X",
        "online": true,
        "synced": true,
        "crawling": false,
        "blockheight": 900,
        "bestBlockHash": "H",
        "blocktime": 1_700_000_000u64,
    });
    let reply = request_with_retry(
        &wallet,
        1,
        MessageId::Heartbeat,
        serde_json::to_vec(&heartbeat).unwrap(),
    )
    .await
    .expect("heartbeat");
    assert_eq!(reply, b"Received HEARTBEAT");

    let status = app
        .database()
        .with_conn(|conn| conn.load_status("X"))
        .unwrap()
        .unwrap();
    assert!(status.online);
    assert_eq!(status.blockheight, 900);
    assert_eq!(status.blockhash, "H");

    app.shutdown().await;
    wallet.shutdown().await;
}
