//! Keyed request/response rendezvous.
//!
//! A sender registers interest in a keyed acknowledgement with
//! [`AckCorrelator::init`] before sending its request, then blocks in
//! [`AckCorrelator::wait`]. Whoever observes the response (typically a
//! handler's `on_read`) delivers it with [`AckCorrelator::commit`]. Commits
//! that arrive before the waiter are buffered; commits without a registered
//! slot are silently dropped.
//!
//! ```ignore
//! correlator.init(msg.id);
//! client.send(msg).await?;
//! let ack = correlator.wait(&msg.id, Duration::from_secs(5)).await?;
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Result, WirelineError};

// Roomy enough that a commit can never block even if a stray duplicate
// arrives before the waiter shows up.
const SLOT_CAPACITY: usize = 2;

struct AckSlot<V> {
    sender: mpsc::Sender<V>,
    receiver: Option<mpsc::Receiver<V>>,
}

/// Parallel-safe acknowledgement correlator.
pub struct AckCorrelator<K, V> {
    slots: Mutex<HashMap<K, AckSlot<V>>>,
}

impl<K, V> AckCorrelator<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send,
{
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a slot for `key`. A second `init` for the same key is a
    /// no-op, so racing initializers cannot leak slots.
    pub fn init(&self, key: K) {
        let mut slots = self.slots.lock().unwrap();
        slots.entry(key).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(SLOT_CAPACITY);
            AckSlot {
                sender,
                receiver: Some(receiver),
            }
        });
    }

    /// Block until the acknowledgement for `key` is committed or `timeout`
    /// elapses; a zero timeout waits indefinitely.
    ///
    /// Returns `Ok(None)` immediately when no slot exists for `key` (or
    /// another waiter already owns it). The slot is removed on either
    /// outcome.
    pub fn wait<'a>(
        &'a self,
        key: &'a K,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Option<V>>> + Send + 'a {
        self.wait_impl(key, timeout)
    }

    async fn wait_impl(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        let receiver = {
            let mut slots = self.slots.lock().unwrap();
            slots.get_mut(key).and_then(|slot| slot.receiver.take())
        };
        let Some(mut receiver) = receiver else {
            return Ok(None);
        };

        let outcome = if timeout > Duration::ZERO {
            tokio::time::timeout(timeout, receiver.recv()).await
        } else {
            Ok(receiver.recv().await)
        };

        self.slots.lock().unwrap().remove(key);

        match outcome {
            Ok(delivered) => Ok(delivered),
            Err(_) => Err(WirelineError::AckTimeout),
        }
    }

    /// Deliver the acknowledgement for `key`. Never blocks; dropped
    /// silently when no slot exists.
    pub fn commit(&self, key: &K, value: V) {
        let sender = {
            let slots = self.slots.lock().unwrap();
            slots.get(key).map(|slot| slot.sender.clone())
        };
        if let Some(sender) = sender {
            let _ = sender.try_send(value);
        }
    }
}

impl<K, V> Default for AckCorrelator<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send,
{
    fn default() -> Self {
        Self::new()
    }
}
