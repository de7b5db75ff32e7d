//! TCP client facade.
//!
//! A [`Client`] dials one connection, runs a pipeline over it and
//! supervises it: when the pipeline dies (remote close, transport failure)
//! the client stops itself. `send`/`send_future` delegate to the live
//! channel while running.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new(config, initializer);
//! client.start().await?;
//! client.send(msg).await?;
//! client.stop().await;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::{Result, WirelineError};
use crate::pipeline::{Channel, DuplexPipeline, PipelineInitializer, SendCallback};

use super::config::{apply_tcp_options, ClientConfig};

/// Pipeline-backed TCP client.
pub struct Client<I: PipelineInitializer> {
    config: ClientConfig,
    initializer: Arc<I>,
    running: RwLock<bool>,
    pipeline: Mutex<Option<Arc<DuplexPipeline<I::Msg>>>>,
    running_tx: watch::Sender<bool>,
}

impl<I: PipelineInitializer + 'static> Client<I> {
    /// Create a client; nothing connects until [`Client::start`].
    pub fn new(config: ClientConfig, initializer: I) -> Arc<Self> {
        let (running_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            initializer: Arc::new(initializer),
            running: RwLock::new(false),
            pipeline: Mutex::new(None),
            running_tx,
        })
    }

    /// Dial the remote and bring up the pipeline. A no-op while running.
    pub fn start<'a>(
        self: &'a Arc<Self>,
    ) -> impl std::future::Future<Output = Result<()>> + Send + 'a {
        self.start_impl()
    }

    async fn start_impl(self: &Arc<Self>) -> Result<()> {
        if *self.running.read().unwrap() {
            return Ok(());
        }

        let addr = SocketAddr::new(self.config.remote_addr, self.config.port);
        let stream = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    WirelineError::from(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out", addr),
                    ))
                })??,
            None => TcpStream::connect(addr).await?,
        };
        if let Err(err) = apply_tcp_options(&stream, &self.config.tcp) {
            warn!("could not apply socket options: {}", err);
        }

        let pipeline = DuplexPipeline::initialize(stream, self.initializer.as_ref())?;
        pipeline.start()?;

        let lost_race = {
            let mut running = self.running.write().unwrap();
            if *running {
                true
            } else {
                *self.pipeline.lock().unwrap() = Some(Arc::clone(&pipeline));
                *running = true;
                false
            }
        };
        if lost_race {
            pipeline.stop().await;
            return Ok(());
        }
        self.running_tx.send_replace(true);

        // Supervise: a dead pipeline takes the client down with it.
        let client = Arc::clone(self);
        let supervised = Arc::clone(&pipeline);
        tokio::spawn(async move {
            trace!("pipeline watcher for {} start", supervised.remote());
            supervised.sync().await;
            if client.is_running() {
                client.stop().await;
            }
            trace!("pipeline watcher for {} stop", supervised.remote());
        });

        Ok(())
    }

    /// Stop the pipeline and disconnect. A no-op unless running.
    pub fn stop(&self) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.stop_impl()
    }

    async fn stop_impl(&self) {
        let pipeline = {
            let mut running = self.running.write().unwrap();
            if !*running {
                return;
            }
            *running = false;
            self.pipeline.lock().unwrap().take()
        };

        if let Some(pipeline) = pipeline {
            pipeline.stop().await;
        }
        self.running_tx.send_replace(false);
    }

    /// True while connected with a running pipeline.
    pub fn is_running(&self) -> bool {
        *self.running.read().unwrap()
    }

    /// Send a message and wait for the write outcome. Fails with
    /// [`WirelineError::ClientNotRunning`] when disconnected.
    pub fn send(&self, msg: I::Msg) -> impl std::future::Future<Output = Result<()>> + Send + '_ {
        self.send_impl(msg)
    }

    async fn send_impl(&self, msg: I::Msg) -> Result<()> {
        match self.current_channel() {
            Some(channel) => channel.send(msg).await,
            None => Err(WirelineError::ClientNotRunning),
        }
    }

    /// Queue a message; the callback fires exactly once with the outcome.
    pub fn send_future(
        &self,
        msg: I::Msg,
        callback: Option<SendCallback>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.send_future_impl(msg, callback)
    }

    async fn send_future_impl(&self, msg: I::Msg, callback: Option<SendCallback>) {
        match self.current_channel() {
            Some(channel) => channel.send_future(msg, callback).await,
            None => {
                if let Some(callback) = callback {
                    callback(Err(WirelineError::ClientNotRunning));
                }
            }
        }
    }

    /// Wait until the client stops. Returns immediately if it never
    /// started.
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

    fn current_channel(&self) -> Option<Channel<I::Msg>> {
        if !*self.running.read().unwrap() {
            return None;
        }
        self.pipeline
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|pipeline| pipeline.channel())
    }
}
