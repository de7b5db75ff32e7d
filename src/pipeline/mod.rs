//! Per-connection pipeline engine.
//!
//! One [`DuplexPipeline`] runs per TCP connection, driving three workers
//! (reader/decoder, inbound dispatcher, outbound encoder/writer) over
//! bounded queues. Applications interact with the connection through its
//! [`Channel`] and observe it through a [`ChannelHandler`]; request/response
//! flows block on an [`AckCorrelator`].

pub mod ack;
pub mod channel;
pub mod duplex;
pub mod group;
pub mod handler;

pub use ack::AckCorrelator;
pub use channel::{Channel, ContextValue, SendCallback};
pub use duplex::DuplexPipeline;
pub use group::ChannelGroup;
pub use handler::{BoxFuture, ChannelHandler, FnHandler, FnInitializer, PipelineInitializer};
