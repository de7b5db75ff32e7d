//! Application-facing handle for one connection.
//!
//! A [`Channel`] is created when its pipeline becomes ready and handed to
//! every handler hook. It exposes sending, a per-connection context map,
//! the peer address and `close`. Handles are cheap to clone; all clones
//! refer to the same connection.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::{Result, WirelineError};

use super::duplex::DuplexPipeline;

/// Callback invoked exactly once with the outcome of a queued send.
pub type SendCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Value stored in a channel's context map.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// One queued outbound message plus its completion callback.
pub(crate) struct OutboundEntry<M> {
    pub(crate) msg: M,
    pub(crate) callback: Option<SendCallback>,
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

struct ChannelInner<M: Send + 'static> {
    id: u64,
    pipeline: Weak<DuplexPipeline<M>>,
    remote: SocketAddr,
    // Handler callbacks for one channel are serialized by the pipeline, so
    // this lock is uncontended in practice.
    context: Mutex<HashMap<String, ContextValue>>,
}

/// Handle to one connection, bound to its pipeline.
pub struct Channel<M: Send + 'static> {
    inner: Arc<ChannelInner<M>>,
}

impl<M: Send + 'static> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Send + 'static> Channel<M> {
    pub(crate) fn new(pipeline: Weak<DuplexPipeline<M>>, remote: SocketAddr) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                pipeline,
                remote,
                context: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Process-unique identifier of this channel.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Address of the remote peer.
    pub fn remote(&self) -> SocketAddr {
        self.inner.remote
    }

    /// True while the underlying pipeline is running.
    pub fn is_connected(&self) -> bool {
        self.inner
            .pipeline
            .upgrade()
            .map(|pipeline| pipeline.is_running())
            .unwrap_or(false)
    }

    /// Send a message and wait until it has been written (or failed).
    ///
    /// Fails with [`WirelineError::InvalidChannel`] when the pipeline is not
    /// running.
    pub fn send(&self, msg: M) -> impl std::future::Future<Output = Result<()>> + Send + '_ {
        self.send_impl(msg)
    }

    async fn send_impl(&self, msg: M) -> Result<()> {
        match self.inner.pipeline.upgrade() {
            Some(pipeline) if pipeline.is_running() => pipeline.send(msg).await,
            _ => Err(WirelineError::InvalidChannel),
        }
    }

    /// Queue a message; `callback` is invoked exactly once with the write
    /// outcome. When the pipeline is not running the callback fires
    /// immediately with [`WirelineError::InvalidChannel`].
    pub fn send_future(
        &self,
        msg: M,
        callback: Option<SendCallback>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.send_future_impl(msg, callback)
    }

    async fn send_future_impl(&self, msg: M, callback: Option<SendCallback>) {
        match self.inner.pipeline.upgrade() {
            Some(pipeline) if pipeline.is_running() => {
                pipeline.send_future(msg, callback).await;
            }
            _ => {
                if let Some(callback) = callback {
                    callback(Err(WirelineError::InvalidChannel));
                }
            }
        }
    }

    /// Request the connection to close.
    ///
    /// The pipeline stop runs on a detached task, which makes `close` safe
    /// to call from inside handler hooks (the stop sequence joins the very
    /// worker such a hook runs on).
    pub fn close(&self) {
        if let Some(pipeline) = self.inner.pipeline.upgrade() {
            tokio::spawn(async move {
                pipeline.stop().await;
            });
        }
    }

    /// Stop the pipeline and wait for shutdown. Must not be called from a
    /// handler hook; those use [`Channel::close`].
    pub(crate) async fn shutdown(&self) {
        if let Some(pipeline) = self.inner.pipeline.upgrade() {
            pipeline.stop().await;
        }
    }

    /// Look up a context value.
    pub fn context(&self, key: &str) -> Option<ContextValue> {
        self.inner.context.lock().unwrap().get(key).cloned()
    }

    /// Store a context value under `key`, replacing any previous one.
    pub fn set_context<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.inner
            .context
            .lock()
            .unwrap()
            .insert(key.into(), Arc::new(value));
    }

    /// Remove a context value.
    pub fn remove_context(&self, key: &str) {
        self.inner.context.lock().unwrap().remove(key);
    }
}
