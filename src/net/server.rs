//! TCP server facade.
//!
//! A [`Server`] owns a listener, a parallel [`Acceptor`](super::Acceptor)
//! and a [`ChannelGroup`] of live connections. Every accepted connection
//! gets its own pipeline built from the application's
//! [`PipelineInitializer`]; a failing pipeline only tears down its own
//! connection, never the server.
//!
//! # Example
//!
//! ```ignore
//! let server = Server::new(ServerConfig::default(), initializer);
//! server.start().await?;
//! server.sync().await;
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::Result;
use crate::pipeline::{ChannelGroup, DuplexPipeline, PipelineInitializer};

use super::acceptor::{AcceptCallback, Acceptor};
use super::config::{apply_tcp_options, ServerConfig, TcpOptions};

/// Pipeline-per-connection TCP server.
pub struct Server<I: PipelineInitializer> {
    config: ServerConfig,
    initializer: Arc<I>,
    running: RwLock<bool>,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
    group: Arc<ChannelGroup<I::Msg>>,
    local_addr: Mutex<Option<SocketAddr>>,
    running_tx: watch::Sender<bool>,
}

impl<I: PipelineInitializer + 'static> Server<I> {
    /// Create a server; nothing binds until [`Server::start`].
    pub fn new(config: ServerConfig, initializer: I) -> Self {
        let (running_tx, _) = watch::channel(false);
        Self {
            config,
            initializer: Arc::new(initializer),
            running: RwLock::new(false),
            acceptor: Mutex::new(None),
            group: Arc::new(ChannelGroup::new()),
            local_addr: Mutex::new(None),
            running_tx,
        }
    }

    /// Bind the listener and start accepting. A no-op while running.
    pub async fn start(&self) -> Result<()> {
        if *self.running.read().unwrap() {
            return Ok(());
        }

        let listener = TcpListener::bind((self.config.bind_addr, self.config.port)).await?;
        let local_addr = listener.local_addr()?;

        let initializer = Arc::clone(&self.initializer);
        let group = Arc::clone(&self.group);
        let tcp = self.config.tcp.clone();
        let callback: AcceptCallback = Arc::new(move |stream| {
            let initializer = Arc::clone(&initializer);
            let group = Arc::clone(&group);
            let tcp = tcp.clone();
            tokio::spawn(async move {
                serve_connection(stream, tcp, initializer, group).await;
            });
        });

        let acceptor = Acceptor::new(listener, self.config.acceptor_parallelism, callback);

        {
            let mut running = self.running.write().unwrap();
            if *running {
                // Lost a racing start; the extra listener just drops.
                return Ok(());
            }
            acceptor.start();
            *self.acceptor.lock().unwrap() = Some(acceptor);
            *self.local_addr.lock().unwrap() = Some(local_addr);
            *running = true;
        }
        self.running_tx.send_replace(true);

        trace!("server listening on {}", local_addr);
        Ok(())
    }

    /// Stop accepting and close every live connection.
    pub async fn stop(&self) {
        let acceptor = {
            let mut running = self.running.write().unwrap();
            if !*running {
                return;
            }
            *running = false;
            self.acceptor.lock().unwrap().take()
        };

        if let Some(acceptor) = acceptor {
            acceptor.stop();
            acceptor.sync().await;
        }
        self.group.close_all().await;
        self.running_tx.send_replace(false);
    }

    /// True while the server is accepting connections.
    pub fn is_running(&self) -> bool {
        *self.running.read().unwrap()
    }

    /// Address the listener is bound to; `None` before `start`. With port
    /// 0 in the config this reports the ephemeral port actually chosen.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Number of currently connected channels.
    pub fn connection_count(&self) -> usize {
        self.group.len()
    }

    /// Wait until the server stops. Returns immediately if it never
    /// started.
    pub async fn sync(&self) {
        let mut rx = self.running_tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Bring up a pipeline for one accepted connection and supervise it until
/// shutdown. Any setup failure just drops the connection.
async fn serve_connection<I: PipelineInitializer>(
    stream: TcpStream,
    tcp: TcpOptions,
    initializer: Arc<I>,
    group: Arc<ChannelGroup<I::Msg>>,
) {
    if let Err(err) = apply_tcp_options(&stream, &tcp) {
        warn!("could not apply socket options: {}", err);
    }

    let pipeline = match DuplexPipeline::initialize(stream, initializer.as_ref()) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            warn!("pipeline setup failed: {}", err);
            return;
        }
    };
    if let Err(err) = pipeline.start() {
        warn!("pipeline for {} failed to start: {}", pipeline.remote(), err);
        return;
    }

    let channel = match pipeline.channel() {
        Some(channel) => channel,
        None => return,
    };
    group.add(channel.clone());

    pipeline.sync().await;
    group.remove(&channel);
}
