//! Parallel connection acceptor.
//!
//! An [`Acceptor`] runs `P` workers in tight accept loops over one shared
//! listener and invokes a callback for every new connection. Stopping fires
//! an explicit cancellation signal so workers blocked in `accept` wake up
//! immediately; the listener socket itself closes once the last worker
//! drops its handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{trace, warn};

/// Callback invoked by an accept worker for each new connection.
pub type AcceptCallback = Arc<dyn Fn(TcpStream) + Send + Sync>;

/// Parallel accept loop over one listener.
pub struct Acceptor {
    listener: Mutex<Option<Arc<TcpListener>>>,
    parallelism: usize,
    callback: AcceptCallback,
    running: RwLock<bool>,
    active_workers: AtomicUsize,
    stop_tx: watch::Sender<bool>,
    running_tx: watch::Sender<bool>,
}

impl Acceptor {
    /// Create an acceptor over a bound listener. `parallelism` is clamped
    /// to at least one worker.
    pub fn new(listener: TcpListener, parallelism: usize, callback: AcceptCallback) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        let (running_tx, _) = watch::channel(false);

        Arc::new(Self {
            listener: Mutex::new(Some(Arc::new(listener))),
            parallelism: parallelism.max(1),
            callback,
            running: RwLock::new(false),
            active_workers: AtomicUsize::new(0),
            stop_tx,
            running_tx,
        })
    }

    /// Spawn the accept workers. A no-op while already running.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.write().unwrap();
        if *running {
            return;
        }

        let listener = match self.listener.lock().unwrap().clone() {
            Some(listener) => listener,
            None => return, // already stopped
        };

        self.active_workers.store(self.parallelism, Ordering::SeqCst);
        for index in 0..self.parallelism {
            let acceptor = Arc::clone(self);
            let listener = Arc::clone(&listener);
            let stop_rx = self.stop_tx.subscribe();
            tokio::spawn(acceptor.accept_worker(index, listener, stop_rx));
        }

        *running = true;
        self.running_tx.send_replace(true);
    }

    /// Release the listener and wake every worker.
    pub fn stop(&self) {
        let held = {
            let running = self.running.read().unwrap();
            if !*running {
                return;
            }
            self.listener.lock().unwrap().take()
        };
        drop(held);
        self.stop_tx.send_replace(true);
    }

    /// True while at least one accept worker is alive.
    pub fn is_running(&self) -> bool {
        *self.running.read().unwrap()
    }

    /// Wait until every accept worker has exited. Returns immediately if
    /// the acceptor never started.
    pub async fn sync(&self) {
        let mut rx = self.running_tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn accept_worker(
        self: Arc<Self>,
        index: usize,
        listener: Arc<TcpListener>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        trace!("accept worker {} start", index);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        trace!("accept worker {} accepted {}", index, remote);
                        (self.callback)(stream);
                    }
                    Err(err) => {
                        warn!("accept worker {} failed: {}", index, err);
                        break;
                    }
                },
                _ = stop_rx.changed() => break,
            }
        }

        drop(listener);
        if self.active_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last worker out latches the acceptor stopped.
            *self.running.write().unwrap() = false;
            self.running_tx.send_replace(false);
        }

        trace!("accept worker {} stop", index);
    }
}
