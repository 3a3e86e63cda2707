//! Session-level integration tests over loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broker_intercom::{
    Dispatcher, EndpointAddress, IntercomError, Session, SessionConfig,
};
use broker_proto::MessageId;
use tokio::time::timeout;

fn listen_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn started_session(config: SessionConfig, dispatcher: Arc<Dispatcher>) -> Arc<Session> {
    let session = Arc::new(Session::new(config, dispatcher));
    session.start().await.expect("session start");
    session
}

/// Retry a request until the endpoint connects or the deadline passes.
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
async fn request_reply_roundtrip() {
    let wallet_dispatcher = Arc::new(Dispatcher::default());
    wallet_dispatcher.register(MessageId::Info.as_u16(), |_, payload, mut reply| async move {
        let mut echoed = b"info:".to_vec();
        echoed.extend_from_slice(&payload);
        reply.send(echoed).await.unwrap();
    });

    let mut wallet_config = SessionConfig::new(2);
    wallet_config.listen_addr = Some(listen_addr());
    let wallet = started_session(wallet_config, wallet_dispatcher).await;
    let wallet_port = wallet.local_addr().unwrap().port();

    let broker = started_session(SessionConfig::new(1), Arc::new(Dispatcher::default())).await;
    broker.add_endpoint(EndpointAddress::new(2, "127.0.0.1", wallet_port));

    let reply = timeout(
        Duration::from_secs(10),
        request_with_retry(&broker, 2, MessageId::Info, b"X".to_vec()),
    )
    .await
    .expect("test deadline")
    .expect("request");
    assert_eq!(reply, b"info:X");

    broker.shutdown().await;
    wallet.shutdown().await;
}

#[tokio::test]
async fn slow_handler_times_out_and_late_reply_is_discarded() {
    let wallet_dispatcher = Arc::new(Dispatcher::default());
    wallet_dispatcher.register(MessageId::Info.as_u16(), |_, _, reply| async move {
        // Hold the reply past the caller's timeout; the drop path answers
        // late and the caller must have moved on.
        tokio::time::sleep(Duration::from_millis(800)).await;
        drop(reply);
    });

    let mut wallet_config = SessionConfig::new(2);
    wallet_config.listen_addr = Some(listen_addr());
    let wallet = started_session(wallet_config, wallet_dispatcher).await;
    let wallet_port = wallet.local_addr().unwrap().port();

    let mut broker_config = SessionConfig::new(1);
    broker_config.request_timeout = Duration::from_millis(300);
    let broker = started_session(broker_config, Arc::new(Dispatcher::default())).await;
    broker.add_endpoint(EndpointAddress::new(2, "127.0.0.1", wallet_port));

    let result = timeout(
        Duration::from_secs(10),
        request_with_retry(&broker, 2, MessageId::Info, Vec::new()),
    )
    .await
    .expect("test deadline");
    assert!(matches!(result, Err(IntercomError::Timeout)));

    // Give the late reply time to arrive and be discarded; a second
    // request must still work normally afterwards.
    tokio::time::sleep(Duration::from_secs(1)).await;

    broker.shutdown().await;
    wallet.shutdown().await;
}

#[tokio::test]
async fn closing_endpoint_cancels_in_flight_requests() {
    let wallet_dispatcher = Arc::new(Dispatcher::default());
    wallet_dispatcher.register(MessageId::Info.as_u16(), |_, _, reply| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(reply);
    });

    let mut wallet_config = SessionConfig::new(2);
    wallet_config.listen_addr = Some(listen_addr());
    let wallet = started_session(wallet_config, wallet_dispatcher).await;
    let wallet_port = wallet.local_addr().unwrap().port();

    let broker = started_session(SessionConfig::new(1), Arc::new(Dispatcher::default())).await;
    broker.add_endpoint(EndpointAddress::new(2, "127.0.0.1", wallet_port));

    let requester = {
        let broker = broker.clone();
        tokio::spawn(async move {
            request_with_retry(&broker, 2, MessageId::Info, Vec::new()).await
        })
    };

    // Let the request get in flight, then close the endpoint under it.
    tokio::time::sleep(Duration::from_millis(500)).await;
    broker.close_endpoint(2);

    let result = timeout(Duration::from_secs(5), requester)
        .await
        .expect("test deadline")
        .expect("join");
    assert!(matches!(result, Err(IntercomError::Cancelled)));

    broker.shutdown().await;
    wallet.shutdown().await;
}

#[tokio::test]
async fn unknown_endpoint_is_rejected() {
    let broker = started_session(SessionConfig::new(1), Arc::new(Dispatcher::default())).await;
    let result = broker.request(99, MessageId::Info, Vec::new()).await;
    assert!(matches!(result, Err(IntercomError::UnknownEndpoint(99))));
    broker.shutdown().await;
}

#[tokio::test]
async fn events_flow_wallet_to_broker() {
    // Each side listens and dials the other, the deployment topology:
    // commands flow broker -> wallet, events flow wallet -> broker.
    let broker_dispatcher = Arc::new(Dispatcher::default());
    broker_dispatcher.register(MessageId::Notify.as_u16(), |sender, payload, mut reply| async move {
        assert_eq!(sender, 2);
        assert_eq!(payload, br#"{"txid":"T1"}"#);
        reply.send(b"Received NOTIFY".to_vec()).await.unwrap();
    });

    let mut broker_config = SessionConfig::new(1);
    broker_config.listen_addr = Some(listen_addr());
    let broker = started_session(broker_config, broker_dispatcher).await;
    let broker_port = broker.local_addr().unwrap().port();

    let wallet = started_session(SessionConfig::new(2), Arc::new(Dispatcher::default())).await;
    wallet.add_endpoint(EndpointAddress::new(1, "127.0.0.1", broker_port));

    let reply = timeout(
        Duration::from_secs(10),
        request_with_retry(&wallet, 1, MessageId::Notify, br#"{"txid":"T1"}"#.to_vec()),
    )
    .await
    .expect("test deadline")
    .expect("notify");
    assert_eq!(reply, b"Received NOTIFY");

    wallet.shutdown().await;
    broker.shutdown().await;
}
