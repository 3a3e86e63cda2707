//! Session layer: endpoint lifecycle and request/reply correlation.
//!
//! A [`Session`] owns one listener plus N outbound endpoints. Outbound
//! requests get a monotonically increasing correlation id and a pending
//! entry; inbound frames whose correlation id matches a pending entry are
//! routed to the waiting caller, everything else goes to the
//! [`Dispatcher`]. A sweeper task fails pending requests that outlive
//! `request_timeout`, and endpoint connections reconnect with bounded
//! exponential backoff.

use crate::connection::{Connection, Listener};
use crate::dispatcher::Dispatcher;
use crate::{EndpointAddress, EndpointId, IntercomError, Result, SecurityMode};
use broker_proto::{Frame, MessageId};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// This endpoint's id, stamped into every outgoing frame.
    pub own_id: EndpointId,
    /// Local listen address; `None` disables the listener.
    pub listen_addr: Option<SocketAddr>,
    /// Plaintext or mutual TLS.
    pub security: SecurityMode,
    /// How long an outbound request may wait for its reply.
    pub request_timeout: Duration,
    /// Socket connect deadline.
    pub connect_timeout: Duration,
    /// First reconnect delay after an endpoint drop.
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling.
    pub backoff_max: Duration,
    /// Per-connection outbound frame queue depth.
    pub writer_queue: usize,
}

impl SessionConfig {
    /// Defaults for an endpoint id.
    pub fn new(own_id: EndpointId) -> Self {
        Self {
            own_id,
            listen_addr: None,
            security: SecurityMode::Plaintext,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            writer_queue: 1024,
        }
    }
}

/// A request waiting for its reply.
struct PendingRequest {
    endpoint: EndpointId,
    deadline: Instant,
    tx: oneshot::Sender<Result<Vec<u8>>>,
}

/// Handle to an outbound endpoint.
struct EndpointHandle {
    address: EndpointAddress,
    /// Sender into the current connection's write loop; `None` while
    /// disconnected.
    writer: Arc<RwLock<Option<mpsc::Sender<Frame>>>>,
    task: JoinHandle<()>,
}

/// An Intercom2 session: listener, endpoints, correlation table.
pub struct Session {
    config: SessionConfig,
    dispatcher: Arc<Dispatcher>,
    endpoints: DashMap<EndpointId, EndpointHandle>,
    pending: Arc<DashMap<u64, PendingRequest>>,
    next_correlation: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    service_tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl Session {
    /// Create a session. Call [`Session::start`] before issuing requests.
    pub fn new(config: SessionConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher,
            endpoints: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            next_correlation: AtomicU64::new(1),
            shutdown_tx,
            service_tasks: Mutex::new(Vec::new()),
            local_addr: RwLock::new(None),
        }
    }

    /// Bind the listener (if configured) and start the timeout sweeper.
    ///
    /// A listener bind failure is fatal; the caller should exit.
    pub async fn start(&self) -> Result<()> {
        if let Some(addr) = self.config.listen_addr {
            let listener = Listener::bind(addr, &self.config.security).await?;
            *self.local_addr.write() = Some(listener.local_addr());
            info!(addr = %listener.local_addr(), "intercom listening");

            let own_id = self.config.own_id;
            let queue = self.config.writer_queue;
            let pending = self.pending.clone();
            let dispatcher = self.dispatcher.clone();
            let shutdown_tx = self.shutdown_tx.clone();
            let accept_task = tokio::spawn(async move {
                let mut shutdown = shutdown_tx.subscribe();
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        accepted = listener.accept() => match accepted {
                            Ok(conn) => {
                                let pending = pending.clone();
                                let dispatcher = dispatcher.clone();
                                let shutdown = shutdown_tx.subscribe();
                                tokio::spawn(run_connection(
                                    own_id, conn, None, queue, pending, dispatcher, shutdown,
                                ));
                            }
                            Err(e) => {
                                warn!("accept failed: {e}");
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        }
                    }
                }
            });
            self.service_tasks.lock().push(accept_task);
        }

        let pending = self.pending.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let sweeper_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => sweep_expired(&pending),
                }
            }
        });
        self.service_tasks.lock().push(sweeper_task);

        Ok(())
    }

    /// Actual listener address (useful when bound to port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// The dispatcher handlers are registered on.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Register an outbound endpoint and start connecting to it.
    pub fn add_endpoint(&self, address: EndpointAddress) {
        let writer: Arc<RwLock<Option<mpsc::Sender<Frame>>>> = Arc::new(RwLock::new(None));
        let task = tokio::spawn(run_endpoint(
            self.config.clone(),
            address.clone(),
            writer.clone(),
            self.pending.clone(),
            self.dispatcher.clone(),
            self.shutdown_tx.clone(),
        ));
        let previous = self.endpoints.insert(
            address.remote_id,
            EndpointHandle {
                address,
                writer,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Send a request and await its reply.
    ///
    /// Resolves with the reply payload, or `Timeout` after
    /// `request_timeout`, or `Cancelled` if the endpoint is closed while
    /// the request is in flight.
    pub async fn request(
        &self,
        remote_id: EndpointId,
        message_id: MessageId,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let writer = {
            let entry = self
                .endpoints
                .get(&remote_id)
                .ok_or(IntercomError::UnknownEndpoint(remote_id))?;
            let writer = entry.writer.read().clone();
            writer.ok_or(IntercomError::NotConnected(remote_id))?
        };

        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            correlation_id,
            PendingRequest {
                endpoint: remote_id,
                deadline: Instant::now() + self.config.request_timeout,
                tx,
            },
        );

        let frame = Frame::new(self.config.own_id, message_id.as_u16(), correlation_id, payload)?;
        if writer.send(frame).await.is_err() {
            self.pending.remove(&correlation_id);
            return Err(IntercomError::NotConnected(remote_id));
        }

        debug!(%message_id, correlation_id, remote_id, "request sent");
        match rx.await {
            Ok(result) => result,
            // The pending entry vanished without a verdict; the session is
            // going away.
            Err(_) => Err(IntercomError::Cancelled),
        }
    }

    /// Close one endpoint, cancelling its pending requests.
    pub fn close_endpoint(&self, remote_id: EndpointId) {
        if let Some((_, handle)) = self.endpoints.remove(&remote_id) {
            info!(endpoint = %handle.address, "closing endpoint");
            handle.task.abort();
            *handle.writer.write() = None;
        }
        self.cancel_pending_for(remote_id);
    }

    /// Shut the session down: close all endpoints and stop service tasks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let ids: Vec<EndpointId> = self.endpoints.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.close_endpoint(id);
        }
        for task in self.service_tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn cancel_pending_for(&self, remote_id: EndpointId) {
        let cancelled: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.endpoint == remote_id)
            .map(|entry| *entry.key())
            .collect();
        for key in cancelled {
            if let Some((_, pending)) = self.pending.remove(&key) {
                let _ = pending.tx.send(Err(IntercomError::Cancelled));
            }
        }
    }
}

/// Fail pending requests whose deadline has passed. Late replies for a
/// purged correlation id are discarded on arrival.
fn sweep_expired(pending: &DashMap<u64, PendingRequest>) {
    let now = Instant::now();
    let expired: Vec<u64> = pending
        .iter()
        .filter(|entry| entry.deadline <= now)
        .map(|entry| *entry.key())
        .collect();
    for key in expired {
        if let Some((_, request)) = pending.remove(&key) {
            debug!(correlation_id = key, "request timed out");
            let _ = request.tx.send(Err(IntercomError::Timeout));
        }
    }
}

/// Connect-loop for one outbound endpoint, with jittered exponential
/// backoff between attempts.
async fn run_endpoint(
    config: SessionConfig,
    address: EndpointAddress,
    writer: Arc<RwLock<Option<mpsc::Sender<Frame>>>>,
    pending: Arc<DashMap<u64, PendingRequest>>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut backoff = config.backoff_initial;
    loop {
        let mut shutdown = shutdown_tx.subscribe();
        let attempt = Connection::connect(
            &address.host,
            address.port,
            &config.security,
            config.connect_timeout,
        );
        let conn = tokio::select! {
            _ = shutdown.recv() => return,
            result = attempt => match result {
                Ok(conn) => {
                    info!(endpoint = %address, "endpoint connected");
                    backoff = config.backoff_initial;
                    Some(conn)
                }
                Err(e) => {
                    warn!(endpoint = %address, "connect failed: {e}");
                    None
                }
            }
        };

        if let Some(conn) = conn {
            run_connection(
                config.own_id,
                conn,
                Some(writer.clone()),
                config.writer_queue,
                pending.clone(),
                dispatcher.clone(),
                shutdown_tx.subscribe(),
            )
            .await;
            warn!(endpoint = %address, "endpoint disconnected");
        }

        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        let delay = backoff.mul_f64(jitter);
        let mut shutdown = shutdown_tx.subscribe();
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        backoff = (backoff * 2).min(config.backoff_max);
    }
}

/// Pump one established connection until it drops or the session shuts
/// down. `writer_slot` is populated for outbound endpoints so
/// [`Session::request`] can reach the live connection.
async fn run_connection(
    own_id: EndpointId,
    conn: Connection,
    writer_slot: Option<Arc<RwLock<Option<mpsc::Sender<Frame>>>>>,
    queue: usize,
    pending: Arc<DashMap<u64, PendingRequest>>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let remote = conn.remote_addr();
    let (mut reader, mut writer) = conn.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(queue);
    if let Some(slot) = &writer_slot {
        *slot.write() = Some(tx.clone());
    }

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.send(&frame).await {
                debug!(%remote, "write failed: {e}");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            received = reader.recv() => match received {
                Ok(Some(frame)) => route_frame(own_id, frame, &tx, &pending, &dispatcher),
                Ok(None) => {
                    debug!(%remote, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(%remote, "connection error: {e}");
                    break;
                }
            }
        }
    }

    if let Some(slot) = &writer_slot {
        *slot.write() = None;
    }
    write_task.abort();
}

/// Route one inbound frame: pending reply, late reply, or request.
///
/// Both peers allocate correlation ids independently, so an id match
/// alone cannot distinguish a reply from a request. A frame whose
/// message id has a registered handler is always an inbound request;
/// everything else correlated is a reply (the wallet echoes our command's
/// message id back).
fn route_frame(
    own_id: EndpointId,
    frame: Frame,
    writer: &mpsc::Sender<Frame>,
    pending: &DashMap<u64, PendingRequest>,
    dispatcher: &Dispatcher,
) {
    if frame.is_correlated() && !dispatcher.has_handler(frame.message_id) {
        if let Some((_, request)) = pending.remove(&frame.correlation_id) {
            let _ = request.tx.send(Ok(frame.payload));
        } else {
            // The matching request already timed out or was cancelled.
            debug!(
                message_id = frame.message_id,
                correlation_id = frame.correlation_id,
                "discarding late reply"
            );
        }
        return;
    }
    dispatcher.dispatch(own_id, frame, writer.clone());
}
