//! Full-duplex per-connection pipeline.
//!
//! A [`DuplexPipeline`] binds one TCP connection to three cooperating
//! workers communicating only through bounded queues and stop signals:
//!
//! ```text
//! +----------------------------------------------+
//! |            TCP Network Connection            |
//! +----------------------------------------------+
//!         ^ (write)                   | (read)
//! +----------------+          +----------------+
//! |  FrameEncoder  |          |  FrameDecoder  |
//! +----------------+          +----------------+
//!         ^                            v
//! +----------------+          +----------------+
//! | outbound worker|          | inbound queue  |
//! +----------------+          +----------------+
//!         ^                            v
//! +----------------+          +----------------+
//! | outbound queue |          | inbound worker |
//! +----------------+          +----------------+
//!         ^                            v
//! +----------------+          +----------------+
//! |    Channel     | <-bind-> | ChannelHandler |
//! +----------------+          +----------------+
//! ```
//!
//! Lifecycle:
//!
//! ```text
//! +-----+        +-------+         +---------+        +----------+
//! | NEW | -init->| READY | -start->| RUNNING | -stop->| SHUTDOWN |
//! +-----+        +-------+         +---------+        +----------+
//! ```
//!
//! Each edge is taken at most once; re-entrant calls are no-ops. Stopping
//! the pipeline also closes the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::buffer::ByteBuf;
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::{Result, WirelineError};

use super::channel::{Channel, OutboundEntry, SendCallback};
use super::handler::{ChannelHandler, PipelineInitializer};

// Bounded queue capacity for both directions. A slow handler fills the
// inbound queue, which stalls the reader, which stalls the peer through TCP
// flow control.
const QUEUE_SIZE: usize = 10;

const READ_BUFFER_SIZE: usize = 1024;
const BYTE_BUFFER_SIZE: usize = 2 * READ_BUFFER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    New,
    Ready,
    Running,
    Shutdown,
}

/// Transport and codecs, held from construction until `start` moves them
/// into the workers.
struct IoParts<M: Send + 'static> {
    stream: TcpStream,
    decoder: Box<dyn FrameDecoder<Item = M>>,
    encoder: Box<dyn FrameEncoder<Item = M>>,
}

/// Queue endpoints and stop signals allocated by `init`, consumed by
/// `start`.
struct QueueParts<M: Send + 'static> {
    inbound_tx: mpsc::Sender<M>,
    inbound_rx: mpsc::Receiver<M>,
    outbound_rx: mpsc::Receiver<OutboundEntry<M>>,
    reader_stop: (oneshot::Sender<()>, oneshot::Receiver<()>),
    inbound_stop: (oneshot::Sender<()>, oneshot::Receiver<()>),
    outbound_stop: (oneshot::Sender<()>, oneshot::Receiver<()>),
}

/// Worker handles and stop signals, held while running.
struct Workers {
    reader: JoinHandle<()>,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
    reader_stop: oneshot::Sender<()>,
    inbound_stop: oneshot::Sender<()>,
    outbound_stop: oneshot::Sender<()>,
}

enum StopAction {
    Proceed(Box<Workers>),
    AwaitQuiesce,
    NotRunning,
}

/// Full-duplex pipeline bound to one TCP connection.
pub struct DuplexPipeline<M: Send + 'static> {
    remote: SocketAddr,
    handler: Arc<dyn ChannelHandler<M>>,
    state: RwLock<PipelineState>,
    io_parts: Mutex<Option<IoParts<M>>>,
    queue_parts: Mutex<Option<QueueParts<M>>>,
    workers: Mutex<Option<Workers>>,
    channel: OnceLock<Channel<M>>,
    outbound_tx: OnceLock<mpsc::Sender<OutboundEntry<M>>>,
    running_tx: watch::Sender<bool>,
}

impl<M: Send + 'static> DuplexPipeline<M> {
    /// Create a pipeline over `stream` with the given collaborators. The
    /// pipeline starts in the NEW state; call [`DuplexPipeline::init`] and
    /// [`DuplexPipeline::start`] to bring it up.
    pub fn new(
        stream: TcpStream,
        decoder: Box<dyn FrameDecoder<Item = M>>,
        encoder: Box<dyn FrameEncoder<Item = M>>,
        handler: Arc<dyn ChannelHandler<M>>,
    ) -> Result<Arc<Self>> {
        let remote = stream.peer_addr()?;
        let (running_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            remote,
            handler,
            state: RwLock::new(PipelineState::New),
            io_parts: Mutex::new(Some(IoParts {
                stream,
                decoder,
                encoder,
            })),
            queue_parts: Mutex::new(None),
            workers: Mutex::new(None),
            channel: OnceLock::new(),
            outbound_tx: OnceLock::new(),
            running_tx,
        }))
    }

    /// Build, initialize and return a pipeline using the application's
    /// initializer. The result is READY; call `start` to run it.
    pub fn initialize<I>(stream: TcpStream, initializer: &I) -> Result<Arc<Self>>
    where
        I: PipelineInitializer<Msg = M> + ?Sized,
    {
        let pipeline = Self::new(
            stream,
            initializer.build_decoder(),
            initializer.build_encoder(),
            initializer.build_handler(),
        )?;
        pipeline.init()?;
        Ok(pipeline)
    }

    /// NEW → READY: allocate the bounded queues and stop signals and create
    /// the channel. A no-op in any other state.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if *state != PipelineState::New {
            return Ok(());
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_SIZE);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_SIZE);
        let _ = self.outbound_tx.set(outbound_tx);
        *self.queue_parts.lock().unwrap() = Some(QueueParts {
            inbound_tx,
            inbound_rx,
            outbound_rx,
            reader_stop: oneshot::channel(),
            inbound_stop: oneshot::channel(),
            outbound_stop: oneshot::channel(),
        });

        let _ = self
            .channel
            .set(Channel::new(Arc::downgrade(self), self.remote));

        *state = PipelineState::Ready;
        Ok(())
    }

    /// READY → RUNNING: spawn the reader/decoder, inbound dispatcher and
    /// outbound encoder/writer workers. A no-op in any other state.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if *state != PipelineState::Ready {
            return Ok(());
        }

        let io = self
            .io_parts
            .lock()
            .unwrap()
            .take()
            .expect("io parts present in READY state");
        let queues = self
            .queue_parts
            .lock()
            .unwrap()
            .take()
            .expect("queues allocated by init");
        let channel = self
            .channel
            .get()
            .expect("channel created by init")
            .clone();

        let (read_half, write_half) = io.stream.into_split();
        let (reader_stop_tx, reader_stop_rx) = queues.reader_stop;
        let (inbound_stop_tx, inbound_stop_rx) = queues.inbound_stop;
        let (outbound_stop_tx, outbound_stop_rx) = queues.outbound_stop;

        let reader = tokio::spawn(Arc::clone(self).reader_worker(
            read_half,
            io.decoder,
            queues.inbound_tx,
            channel.clone(),
            reader_stop_rx,
        ));
        let inbound = tokio::spawn(Arc::clone(self).inbound_worker(
            queues.inbound_rx,
            channel.clone(),
            inbound_stop_rx,
        ));
        let outbound = tokio::spawn(Arc::clone(self).outbound_worker(
            queues.outbound_rx,
            io.encoder,
            write_half,
            channel,
            outbound_stop_rx,
        ));

        *self.workers.lock().unwrap() = Some(Workers {
            reader,
            inbound,
            outbound,
            reader_stop: reader_stop_tx,
            inbound_stop: inbound_stop_tx,
            outbound_stop: outbound_stop_tx,
        });

        *state = PipelineState::Running;
        self.running_tx.send_replace(true);
        Ok(())
    }

    /// RUNNING → SHUTDOWN: stop the workers in order, close the
    /// connection, fire `on_inactivate`, release `sync` waiters.
    ///
    /// Idempotent; a concurrent caller waits until the shutdown completes.
    /// After `stop` returns no further handler hook runs for this pipeline.
    /// Must not be awaited from inside a handler hook (the hook's own
    /// worker gets joined here); hooks use [`Channel::close`] instead,
    /// which detaches the stop.
    pub fn stop(&self) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.stop_impl()
    }

    async fn stop_impl(&self) {
        let action = {
            let state = self.state.read().unwrap();
            if *state != PipelineState::Running {
                StopAction::NotRunning
            } else {
                match self.workers.lock().unwrap().take() {
                    Some(workers) => StopAction::Proceed(Box::new(workers)),
                    None => StopAction::AwaitQuiesce,
                }
            }
        };

        let workers = match action {
            StopAction::Proceed(workers) => workers,
            StopAction::AwaitQuiesce => {
                // Another caller is already shutting down; wait for it.
                self.sync().await;
                return;
            }
            StopAction::NotRunning => return,
        };

        // The dispatcher and writer must drain and exit before the
        // connection goes away, or in-flight writes are lost.
        let _ = workers.inbound_stop.send(());
        let _ = workers.outbound_stop.send(());
        let _ = workers.inbound.await;
        let _ = workers.outbound.await;

        // Now the reader: the stop signal doubles as the transport close,
        // since the reader drops the read half on its way out.
        let _ = workers.reader_stop.send(());
        let _ = workers.reader.await;

        // Both queue receivers died with their workers; nothing dispatches
        // after this point, making this the single place the inactivate
        // hook can run without racing a read.
        if let Some(channel) = self.channel.get() {
            if let Err(err) = self.handler.on_inactivate(channel.clone()).await {
                self.handler.on_error(channel.clone(), err).await;
            }
        }

        *self.state.write().unwrap() = PipelineState::Shutdown;
        self.running_tx.send_replace(false);
    }

    /// True while the pipeline is RUNNING.
    pub fn is_running(&self) -> bool {
        *self.state.read().unwrap() == PipelineState::Running
    }

    /// The channel bound to this pipeline; `None` before `init`.
    pub fn channel(&self) -> Option<Channel<M>> {
        self.channel.get().cloned()
    }

    /// Address of the remote peer.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Queue `msg` and wait until the outbound worker has written it (or
    /// failed to).
    pub fn send(&self, msg: M) -> impl std::future::Future<Output = Result<()>> + Send + '_ {
        self.send_impl(msg)
    }

    async fn send_impl(&self, msg: M) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_future(
            msg,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )
        .await;
        rx.await.unwrap_or(Err(WirelineError::Closed))
    }

    /// Queue `msg` without waiting for the write; `callback` fires exactly
    /// once with the outcome. When the pipeline is not RUNNING the message
    /// is not queued and the callback fires immediately with
    /// [`WirelineError::Closed`].
    pub fn send_future(
        &self,
        msg: M,
        callback: Option<SendCallback>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.send_future_impl(msg, callback)
    }

    async fn send_future_impl(&self, msg: M, callback: Option<SendCallback>) {
        if !self.is_running() {
            if let Some(callback) = callback {
                callback(Err(WirelineError::Closed));
            }
            return;
        }

        let sender = match self.outbound_tx.get() {
            Some(sender) => sender.clone(),
            None => {
                if let Some(callback) = callback {
                    callback(Err(WirelineError::Closed));
                }
                return;
            }
        };

        if let Err(mpsc::error::SendError(entry)) =
            sender.send(OutboundEntry { msg, callback }).await
        {
            if let Some(callback) = entry.callback {
                callback(Err(WirelineError::Closed));
            }
        }
    }

    /// Wait until the pipeline reaches SHUTDOWN. Returns immediately if it
    /// never started.
    pub fn sync(&self) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.sync_impl()
    }

    async fn sync_impl(&self) {
        let mut rx = self.running_tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Schedule `stop` on a detached task. Used wherever the caller runs on
    /// one of the workers `stop` would join.
    fn detach_stop(self: &Arc<Self>) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.stop().await;
        });
    }

    async fn reader_worker(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        mut decoder: Box<dyn FrameDecoder<Item = M>>,
        inbound_tx: mpsc::Sender<M>,
        channel: Channel<M>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        trace!("reader worker for {} start", self.remote);

        if let Err(err) = self.handler.on_activate(channel.clone()).await {
            self.handler.on_error(channel.clone(), err).await;
        }

        let mut scratch = vec![0u8; READ_BUFFER_SIZE];
        let mut buffer = ByteBuf::new(BYTE_BUFFER_SIZE);

        'read: loop {
            let count = tokio::select! {
                result = read_half.read(&mut scratch) => match result {
                    Ok(0) => {
                        trace!("remote {} closed the connection", self.remote);
                        self.detach_stop();
                        break 'read;
                    }
                    Ok(count) => count,
                    Err(err) => {
                        trace!("read from {} failed: {}", self.remote, err);
                        self.detach_stop();
                        break 'read;
                    }
                },
                _ = &mut stop_rx => break 'read,
            };

            trace!("reader worker read {} bytes from {}", count, self.remote);
            buffer.write_bytes(&scratch[..count]);

            loop {
                match decoder.decode(&mut buffer) {
                    Ok(Some(msg)) => {
                        if inbound_tx.send(msg).await.is_err() {
                            // Dispatcher already stopped; shutdown is in
                            // progress.
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        // The decoder is poisoned; this connection cannot
                        // produce another valid frame.
                        self.handler.on_error(channel.clone(), err).await;
                        self.detach_stop();
                        break 'read;
                    }
                }
            }

            buffer.release();
        }

        trace!("reader worker for {} stop", self.remote);
    }

    async fn inbound_worker(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<M>,
        channel: Channel<M>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        trace!("inbound worker for {} start", self.remote);

        loop {
            tokio::select! {
                inbound = inbound_rx.recv() => match inbound {
                    Some(msg) => {
                        if let Err(err) = self.handler.on_read(channel.clone(), msg).await {
                            self.handler.on_error(channel.clone(), err).await;
                        }
                    }
                    None => break,
                },
                _ = &mut stop_rx => break,
            }
        }

        trace!("inbound worker for {} stop", self.remote);
    }

    async fn outbound_worker(
        self: Arc<Self>,
        mut outbound_rx: mpsc::Receiver<OutboundEntry<M>>,
        mut encoder: Box<dyn FrameEncoder<Item = M>>,
        mut write_half: OwnedWriteHalf,
        channel: Channel<M>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        trace!("outbound worker for {} start", self.remote);

        loop {
            tokio::select! {
                entry = outbound_rx.recv() => match entry {
                    Some(OutboundEntry { msg, callback }) => {
                        match encoder.encode(msg) {
                            Err(err) => {
                                // A bad message is a per-send failure, not a
                                // pipeline failure; keep the worker alive.
                                self.handler.on_error(channel.clone(), err.clone()).await;
                                if let Some(callback) = callback {
                                    callback(Err(err));
                                }
                            }
                            Ok(frame) => match write_half.write_all(&frame).await {
                                Ok(()) => {
                                    trace!(
                                        "outbound worker wrote {} bytes to {}",
                                        frame.len(),
                                        self.remote
                                    );
                                    if let Some(callback) = callback {
                                        callback(Ok(()));
                                    }
                                }
                                Err(err) => {
                                    if let Some(callback) = callback {
                                        callback(Err(err.into()));
                                    }
                                }
                            },
                        }
                    }
                    None => break,
                },
                _ = &mut stop_rx => {
                    // Entries still queued will never be written; complete
                    // their callbacks before the queue disappears.
                    while let Ok(entry) = outbound_rx.try_recv() {
                        if let Some(callback) = entry.callback {
                            callback(Err(WirelineError::Closed));
                        }
                    }
                    break;
                }
            }
        }

        let _ = write_half.shutdown().await;
        trace!("outbound worker for {} stop", self.remote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::codec::{TlvConfig, TlvFrameDecoder, TlvFrameEncoder};
    use crate::pipeline::handler::BoxFuture;

    use tokio::net::TcpListener;

    #[derive(Debug, PartialEq, Clone)]
    enum Event {
        Activate,
        Read(Vec<u8>),
        Inactivate,
        Error(String),
    }

    struct RecordingHandler {
        events: mpsc::UnboundedSender<Event>,
    }

    impl ChannelHandler<Bytes> for RecordingHandler {
        fn on_activate(&self, _channel: Channel<Bytes>) -> BoxFuture<'static, Result<()>> {
            let events = self.events.clone();
            Box::pin(async move {
                let _ = events.send(Event::Activate);
                Ok(())
            })
        }

        fn on_inactivate(&self, _channel: Channel<Bytes>) -> BoxFuture<'static, Result<()>> {
            let events = self.events.clone();
            Box::pin(async move {
                let _ = events.send(Event::Inactivate);
                Ok(())
            })
        }

        fn on_read(&self, _channel: Channel<Bytes>, msg: Bytes) -> BoxFuture<'static, Result<()>> {
            let events = self.events.clone();
            Box::pin(async move {
                let _ = events.send(Event::Read(msg.to_vec()));
                Ok(())
            })
        }

        fn on_error(&self, _channel: Channel<Bytes>, error: WirelineError) -> BoxFuture<'static, ()> {
            let events = self.events.clone();
            Box::pin(async move {
                let _ = events.send(Event::Error(error.to_string()));
            })
        }
    }

    const TEST_TAG: u8 = 0xAA;

    fn tlv_config() -> TlvConfig {
        TlvConfig::new(TEST_TAG).with_frame_limit(1024)
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) = tokio::join!(TcpStream::connect(addr), async {
            listener.accept().await.map(|(stream, _)| stream)
        });
        (connected.unwrap(), accepted.unwrap())
    }

    fn pipeline_over(
        stream: TcpStream,
    ) -> (Arc<DuplexPipeline<Bytes>>, mpsc::UnboundedReceiver<Event>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pipeline = DuplexPipeline::new(
            stream,
            Box::new(TlvFrameDecoder::new(tlv_config())),
            Box::new(TlvFrameEncoder::new(tlv_config())),
            Arc::new(RecordingHandler { events: events_tx }),
        )
        .unwrap();
        (pipeline, events_rx)
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![TEST_TAG];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended")
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (_peer, stream) = socket_pair().await;
        let (pipeline, _events) = pipeline_over(stream);

        assert!(!pipeline.is_running());
        assert!(pipeline.channel().is_none());

        pipeline.init().unwrap();
        assert!(!pipeline.is_running());
        assert!(pipeline.channel().is_some());
        pipeline.init().unwrap(); // no-op

        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        pipeline.start().unwrap(); // no-op

        pipeline.stop().await;
        assert!(!pipeline.is_running());
        pipeline.stop().await; // no-op
        pipeline.sync().await;
    }

    #[tokio::test]
    async fn test_sync_before_start_returns_immediately() {
        let (_peer, stream) = socket_pair().await;
        let (pipeline, _events) = pipeline_over(stream);
        pipeline.sync().await;
    }

    #[tokio::test]
    async fn test_send_writes_frame_to_peer() {
        let (mut peer, stream) = socket_pair().await;
        let (pipeline, _events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();

        pipeline.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut received = vec![0u8; 10];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, frame(b"hello"));

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_inbound_order_and_inactivate_last() {
        let (mut peer, stream) = socket_pair().await;
        let (pipeline, mut events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();

        peer.write_all(&frame(b"one")).await.unwrap();
        peer.write_all(&frame(b"two")).await.unwrap();

        assert_eq!(next_event(&mut events).await, Event::Activate);
        assert_eq!(next_event(&mut events).await, Event::Read(b"one".to_vec()));
        assert_eq!(next_event(&mut events).await, Event::Read(b"two".to_vec()));

        pipeline.stop().await;
        assert_eq!(next_event(&mut events).await, Event::Inactivate);

        // After stop returned, no further hooks run.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_stop_single_shutdown() {
        let (_peer, stream) = socket_pair().await;
        let (pipeline, mut events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();

        assert_eq!(next_event(&mut events).await, Event::Activate);

        // Both callers return only once the pipeline is down, and the edge
        // is taken exactly once.
        tokio::join!(pipeline.stop(), pipeline.stop());
        assert!(!pipeline.is_running());

        assert_eq!(next_event(&mut events).await, Event::Inactivate);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_future_when_not_running() {
        let (_peer, stream) = socket_pair().await;
        let (pipeline, _events) = pipeline_over(stream);
        pipeline.init().unwrap();

        let (tx, rx) = oneshot::channel();
        pipeline
            .send_future(
                Bytes::from_static(b"x"),
                Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            )
            .await;

        assert!(matches!(rx.await.unwrap(), Err(WirelineError::Closed)));
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        let (_peer, stream) = socket_pair().await;
        let (pipeline, _events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();
        pipeline.stop().await;

        let result = pipeline.send(Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(WirelineError::Closed)));
    }

    #[tokio::test]
    async fn test_peer_disconnect_shuts_pipeline_down() {
        let (peer, stream) = socket_pair().await;
        let (pipeline, mut events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();

        assert_eq!(next_event(&mut events).await, Event::Activate);
        drop(peer);

        pipeline.sync().await;
        assert!(!pipeline.is_running());
        assert_eq!(next_event(&mut events).await, Event::Inactivate);
    }

    #[tokio::test]
    async fn test_decode_error_poisons_and_stops() {
        let (mut peer, stream) = socket_pair().await;
        let (pipeline, mut events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();

        assert_eq!(next_event(&mut events).await, Event::Activate);

        // Wrong tag byte.
        peer.write_all(&[0xBB, 0, 0, 0, 0]).await.unwrap();

        match next_event(&mut events).await {
            Event::Error(text) => assert!(text.contains("illegal tag")),
            other => panic!("expected decode error, got {:?}", other),
        }

        pipeline.sync().await;
        assert_eq!(next_event(&mut events).await, Event::Inactivate);
    }

    #[tokio::test]
    async fn test_channel_send_roundtrip_through_pipeline() {
        let (mut peer, stream) = socket_pair().await;
        let (pipeline, _events) = pipeline_over(stream);
        pipeline.init().unwrap();
        pipeline.start().unwrap();

        let channel = pipeline.channel().unwrap();
        assert!(channel.is_connected());
        channel.send(Bytes::from_static(b"via channel")).await.unwrap();

        let mut received = vec![0u8; frame(b"via channel").len()];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, frame(b"via channel"));

        pipeline.stop().await;
        assert!(!channel.is_connected());
        let result = channel.send(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(WirelineError::InvalidChannel)));
    }
}
