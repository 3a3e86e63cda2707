//! Inbound message dispatch.
//!
//! Maps a frame's message id to a registered handler. Handlers are async
//! and are not serialized against each other; a semaphore bounds how many
//! run at once. Each correlated request gets a one-shot [`Reply`]: sending
//! twice fails with `DoubleReply`, and a handler that finishes without
//! replying produces a warning and an empty reply so the peer never hangs.

use crate::{EndpointId, IntercomError, Result};
use broker_proto::Frame;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

/// Default number of concurrent handler executions.
pub const DEFAULT_WORKERS: usize = 8;

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(EndpointId, Vec<u8>, Reply) -> HandlerFuture + Send + Sync>;

/// One-shot reply channel handed to a handler.
pub struct Reply {
    inner: ReplyInner,
}

enum ReplyInner {
    /// Reply not yet sent; carries everything needed to frame it.
    Pending(ReplyState),
    /// Uncorrelated frame: nothing to reply to.
    Null,
    /// Reply already sent (or consumed by drop).
    Consumed,
}

struct ReplyState {
    writer: mpsc::Sender<Frame>,
    sender_id: u32,
    message_id: u16,
    correlation_id: u64,
}

impl Reply {
    fn pending(writer: mpsc::Sender<Frame>, sender_id: u32, message_id: u16, correlation_id: u64) -> Self {
        Self {
            inner: ReplyInner::Pending(ReplyState {
                writer,
                sender_id,
                message_id,
                correlation_id,
            }),
        }
    }

    fn null() -> Self {
        Self {
            inner: ReplyInner::Null,
        }
    }

    /// Send the reply payload. Exactly one send is allowed.
    pub async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        match std::mem::replace(&mut self.inner, ReplyInner::Consumed) {
            ReplyInner::Pending(state) => {
                let frame = Frame::new(
                    state.sender_id,
                    state.message_id,
                    state.correlation_id,
                    payload,
                )?;
                state
                    .writer
                    .send(frame)
                    .await
                    .map_err(|_| IntercomError::Transport("reply writer closed".into()))
            }
            // The frame carried no correlation id; the send is a no-op but
            // still consumes the one shot.
            ReplyInner::Null => Ok(()),
            ReplyInner::Consumed => Err(IntercomError::DoubleReply),
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let ReplyInner::Pending(state) = std::mem::replace(&mut self.inner, ReplyInner::Consumed)
        {
            warn!(
                message_id = state.message_id,
                correlation_id = state.correlation_id,
                "handler completed without replying; sending empty reply"
            );
            let frame = Frame {
                sender_id: state.sender_id,
                message_id: state.message_id,
                correlation_id: state.correlation_id,
                payload: Vec::new(),
            };
            if let Err(e) = state.writer.try_send(frame) {
                debug!("could not send empty reply: {e}");
            }
        }
    }
}

/// Registry of inbound message handlers.
pub struct Dispatcher {
    handlers: DashMap<u16, Handler>,
    workers: Arc<Semaphore>,
    capacity: usize,
}

impl Dispatcher {
    /// Create a dispatcher with the given worker-pool size.
    pub fn new(workers: usize) -> Self {
        Self {
            handlers: DashMap::new(),
            workers: Arc::new(Semaphore::new(workers)),
            capacity: workers,
        }
    }

    /// Wait for in-flight handlers to finish, up to `grace`.
    ///
    /// Returns false if handlers were still running when the grace period
    /// expired.
    pub async fn drain(&self, grace: std::time::Duration) -> bool {
        let acquire = self.workers.clone().acquire_many_owned(self.capacity as u32);
        matches!(tokio::time::timeout(grace, acquire).await, Ok(Ok(_)))
    }

    /// Whether a handler is registered for this message id.
    pub(crate) fn has_handler(&self, message_id: u16) -> bool {
        self.handlers.contains_key(&message_id)
    }

    /// Register a handler for a message id, replacing any previous one.
    pub fn register<F, Fut>(&self, message_id: u16, handler: F)
    where
        F: Fn(EndpointId, Vec<u8>, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |sender, payload, reply| {
            Box::pin(handler(sender, payload, reply))
        });
        self.handlers.insert(message_id, handler);
    }

    /// Route one inbound frame to its handler.
    ///
    /// `writer` is the channel back to the connection the frame arrived on;
    /// replies are framed with `own_id` as the sender. The handler runs on
    /// its own task, gated by the worker semaphore.
    pub(crate) fn dispatch(&self, own_id: u32, frame: Frame, writer: mpsc::Sender<Frame>) {
        let reply = if frame.is_correlated() {
            Reply::pending(writer, own_id, frame.message_id, frame.correlation_id)
        } else {
            Reply::null()
        };

        let handler = match self.handlers.get(&frame.message_id) {
            Some(entry) => entry.value().clone(),
            None => {
                // Dropping the reply answers the peer with an empty payload.
                debug!(message_id = frame.message_id, "no handler registered; dropping frame");
                return;
            }
        };

        let workers = self.workers.clone();
        let sender_id = frame.sender_id;
        let payload = frame.payload;
        tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("dispatcher worker pool closed");
                    return;
                }
            };
            handler(sender_id, payload, reply).await;
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
