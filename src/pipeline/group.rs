//! Parallel-safe set of active channels.
//!
//! A server keeps every accepted connection's channel in a
//! [`ChannelGroup`] so a single [`ChannelGroup::close_all`] tears all of
//! them down on shutdown.

use std::collections::HashMap;
use std::sync::Mutex;

use super::channel::Channel;

/// Set of channels supporting batch close.
pub struct ChannelGroup<M: Send + 'static> {
    channels: Mutex<HashMap<u64, Channel<M>>>,
}

impl<M: Send + 'static> ChannelGroup<M> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Add a channel to the group.
    pub fn add(&self, channel: Channel<M>) {
        self.channels.lock().unwrap().insert(channel.id(), channel);
    }

    /// Remove a channel from the group; unknown channels are ignored.
    pub fn remove(&self, channel: &Channel<M>) {
        self.channels.lock().unwrap().remove(&channel.id());
    }

    /// Number of channels currently in the group.
    pub fn len(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// True when the group holds no channel.
    pub fn is_empty(&self) -> bool {
        self.channels.lock().unwrap().is_empty()
    }

    /// Close every channel and empty the group, waiting for each pipeline
    /// to shut down.
    pub async fn close_all(&self) {
        let drained: Vec<Channel<M>> = {
            let mut channels = self.channels.lock().unwrap();
            channels.drain().map(|(_, channel)| channel).collect()
        };
        for channel in drained {
            channel.shutdown().await;
        }
    }
}

impl<M: Send + 'static> Default for ChannelGroup<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    use bytes::Bytes;

    fn detached() -> Channel<Bytes> {
        Channel::new(Weak::new(), "127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_add_remove() {
        let group = ChannelGroup::new();
        let channel = detached();

        group.add(channel.clone());
        assert_eq!(group.len(), 1);

        // Adding the same channel twice keeps one entry.
        group.add(channel.clone());
        assert_eq!(group.len(), 1);

        group.remove(&channel);
        assert!(group.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let group = ChannelGroup::new();
        group.add(detached());

        group.remove(&detached());
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_group() {
        let group = ChannelGroup::new();
        group.add(detached());
        group.add(detached());

        group.close_all().await;
        assert!(group.is_empty());
    }
}
