//! Channel event handlers and pipeline initializers.
//!
//! A [`ChannelHandler`] receives the four events a connection can produce:
//! activation, inactivation, an inbound message, and an error. The pipeline
//! serializes `on_read` calls per connection, so handler state touched only
//! from callbacks needs no extra locking.
//!
//! A [`PipelineInitializer`] is the application-supplied factory invoked
//! exactly once per new connection; each pipeline owns the decoder, encoder
//! and handler it returns.
//!
//! # Example
//!
//! ```ignore
//! let handler = FnHandler::new()
//!     .read(|channel, msg| async move {
//!         channel.send(msg).await // echo
//!     })
//!     .error(|channel, err| async move {
//!         tracing::warn!("{}: {}", channel.remote(), err);
//!     });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::{Result, WirelineError};

use super::channel::Channel;

/// Boxed future returned by handler hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Event hooks for one channel, invoked by its pipeline workers.
///
/// - `on_activate` runs before the first read of the connection.
/// - `on_read` runs once per decoded message, in decode order.
/// - `on_inactivate` runs after the reader has exited and no further
///   `on_read` can happen, before the pipeline reaches shutdown.
/// - `on_error` receives errors returned by the other hooks as well as
///   codec failures.
///
/// Hooks may block (awaiting in a hook stalls the corresponding bounded
/// queue, which is how backpressure reaches the peer). A hook that needs to
/// tear the connection down calls [`Channel::close`], which schedules the
/// stop instead of running it inline.
pub trait ChannelHandler<M>: Send + Sync
where
    M: Send + 'static,
{
    /// Invoked when the connection is ready.
    fn on_activate(&self, channel: Channel<M>) -> BoxFuture<'static, Result<()>> {
        let _ = channel;
        Box::pin(async { Ok(()) })
    }

    /// Invoked after the connection stopped reading.
    fn on_inactivate(&self, channel: Channel<M>) -> BoxFuture<'static, Result<()>> {
        let _ = channel;
        Box::pin(async { Ok(()) })
    }

    /// Invoked for every decoded inbound message.
    fn on_read(&self, channel: Channel<M>, msg: M) -> BoxFuture<'static, Result<()>> {
        let _ = (channel, msg);
        Box::pin(async { Ok(()) })
    }

    /// Invoked when a hook returned an error or a codec failed.
    fn on_error(&self, channel: Channel<M>, error: WirelineError) -> BoxFuture<'static, ()> {
        let _ = (channel, error);
        Box::pin(async {})
    }
}

type ActivateFn<M> = Arc<dyn Fn(Channel<M>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ReadFn<M> = Arc<dyn Fn(Channel<M>, M) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ErrorFn<M> = Arc<dyn Fn(Channel<M>, WirelineError) -> BoxFuture<'static, ()> + Send + Sync>;

/// [`ChannelHandler`] assembled from closures; any hook left unset is a
/// no-op.
pub struct FnHandler<M: Send + 'static> {
    activate: Option<ActivateFn<M>>,
    inactivate: Option<ActivateFn<M>>,
    read: Option<ReadFn<M>>,
    error: Option<ErrorFn<M>>,
}

impl<M: Send + 'static> FnHandler<M> {
    /// Handler with every hook unset.
    pub fn new() -> Self {
        Self {
            activate: None,
            inactivate: None,
            read: None,
            error: None,
        }
    }

    /// Set the activation hook.
    pub fn activate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Channel<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.activate = Some(Arc::new(move |channel| Box::pin(hook(channel))));
        self
    }

    /// Set the inactivation hook.
    pub fn inactivate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Channel<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inactivate = Some(Arc::new(move |channel| Box::pin(hook(channel))));
        self
    }

    /// Set the message hook.
    pub fn read<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Channel<M>, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.read = Some(Arc::new(move |channel, msg| Box::pin(hook(channel, msg))));
        self
    }

    /// Set the error hook.
    pub fn error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Channel<M>, WirelineError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error = Some(Arc::new(move |channel, err| Box::pin(hook(channel, err))));
        self
    }
}

impl<M: Send + 'static> Default for FnHandler<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + 'static> ChannelHandler<M> for FnHandler<M> {
    fn on_activate(&self, channel: Channel<M>) -> BoxFuture<'static, Result<()>> {
        match &self.activate {
            Some(hook) => hook(channel),
            None => Box::pin(async { Ok(()) }),
        }
    }

    fn on_inactivate(&self, channel: Channel<M>) -> BoxFuture<'static, Result<()>> {
        match &self.inactivate {
            Some(hook) => hook(channel),
            None => Box::pin(async { Ok(()) }),
        }
    }

    fn on_read(&self, channel: Channel<M>, msg: M) -> BoxFuture<'static, Result<()>> {
        match &self.read {
            Some(hook) => hook(channel, msg),
            None => Box::pin(async { Ok(()) }),
        }
    }

    fn on_error(&self, channel: Channel<M>, error: WirelineError) -> BoxFuture<'static, ()> {
        match &self.error {
            Some(hook) => hook(channel, error),
            None => Box::pin(async {}),
        }
    }
}

/// Factory for the three per-connection collaborators.
///
/// Called exactly once while a pipeline initializes; every returned instance
/// belongs to that pipeline alone.
pub trait PipelineInitializer: Send + Sync {
    /// Message type flowing through pipelines built by this initializer.
    type Msg: Send + 'static;

    /// Build the frame decoder for a new pipeline.
    fn build_decoder(&self) -> Box<dyn FrameDecoder<Item = Self::Msg>>;

    /// Build the frame encoder for a new pipeline.
    fn build_encoder(&self) -> Box<dyn FrameEncoder<Item = Self::Msg>>;

    /// Build the channel handler for a new pipeline.
    fn build_handler(&self) -> Arc<dyn ChannelHandler<Self::Msg>>;
}

/// [`PipelineInitializer`] assembled from three factory closures, each
/// returning a concrete decoder, encoder or handler.
pub struct FnInitializer<M: Send + 'static> {
    decoder: Box<dyn Fn() -> Box<dyn FrameDecoder<Item = M>> + Send + Sync>,
    encoder: Box<dyn Fn() -> Box<dyn FrameEncoder<Item = M>> + Send + Sync>,
    handler: Box<dyn Fn() -> Arc<dyn ChannelHandler<M>> + Send + Sync>,
}

impl<M: Send + 'static> FnInitializer<M> {
    /// Build an initializer from decoder, encoder and handler factories.
    pub fn new<DF, D, EF, E, HF, H>(decoder: DF, encoder: EF, handler: HF) -> Self
    where
        DF: Fn() -> D + Send + Sync + 'static,
        D: FrameDecoder<Item = M> + 'static,
        EF: Fn() -> E + Send + Sync + 'static,
        E: FrameEncoder<Item = M> + 'static,
        HF: Fn() -> H + Send + Sync + 'static,
        H: ChannelHandler<M> + 'static,
    {
        Self {
            decoder: Box::new(move || Box::new(decoder())),
            encoder: Box::new(move || Box::new(encoder())),
            handler: Box::new(move || Arc::new(handler())),
        }
    }
}

impl<M: Send + 'static> PipelineInitializer for FnInitializer<M> {
    type Msg = M;

    fn build_decoder(&self) -> Box<dyn FrameDecoder<Item = M>> {
        (self.decoder)()
    }

    fn build_encoder(&self) -> Box<dyn FrameEncoder<Item = M>> {
        (self.encoder)()
    }

    fn build_handler(&self) -> Arc<dyn ChannelHandler<M>> {
        (self.handler)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    use bytes::Bytes;

    fn detached_channel() -> Channel<Bytes> {
        Channel::new(Weak::new(), "127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_unset_hooks_are_noops() {
        let handler: FnHandler<Bytes> = FnHandler::new();
        let channel = detached_channel();

        assert!(handler.on_activate(channel.clone()).await.is_ok());
        assert!(handler.on_inactivate(channel.clone()).await.is_ok());
        assert!(handler
            .on_read(channel.clone(), Bytes::from_static(b"x"))
            .await
            .is_ok());
        handler
            .on_error(channel, WirelineError::Closed)
            .await;
    }

    #[tokio::test]
    async fn test_hooks_are_invoked() {
        let reads = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let reads_in_hook = Arc::clone(&reads);
        let errors_in_hook = Arc::clone(&errors);
        let handler = FnHandler::new()
            .read(move |_channel, _msg: Bytes| {
                let reads = Arc::clone(&reads_in_hook);
                async move {
                    reads.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .error(move |_channel, _err| {
                let errors = Arc::clone(&errors_in_hook);
                async move {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            });

        let channel = detached_channel();
        handler
            .on_read(channel.clone(), Bytes::from_static(b"a"))
            .await
            .unwrap();
        handler
            .on_read(channel.clone(), Bytes::from_static(b"b"))
            .await
            .unwrap();
        handler.on_error(channel, WirelineError::Closed).await;

        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fn_initializer_builds_fresh_instances() {
        use crate::codec::{TlvConfig, TlvFrameDecoder, TlvFrameEncoder};

        let config = TlvConfig::new(0xAA);
        let initializer = FnInitializer::new(
            move || TlvFrameDecoder::new(config),
            move || TlvFrameEncoder::new(config),
            FnHandler::<Bytes>::new,
        );

        let _first = initializer.build_decoder();
        let _second = initializer.build_decoder();
        let _encoder = initializer.build_encoder();
        let _handler = initializer.build_handler();
    }

    #[tokio::test]
    async fn test_read_hook_error_propagates() {
        let handler = FnHandler::new().read(|_channel, _msg: Bytes| async {
            Err(WirelineError::decode("test", "boom"))
        });

        let result = handler
            .on_read(detached_channel(), Bytes::from_static(b"a"))
            .await;
        assert!(result.is_err());
    }
}
