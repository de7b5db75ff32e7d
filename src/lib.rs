//! # wireline
//!
//! A library for building event-driven, pipelined TCP servers and clients.
//!
//! Applications register a frame codec and a channel handler; wireline
//! accepts or dials connections, decodes the inbound byte stream into typed
//! messages, dispatches them to the handler, and serializes outbound
//! messages back onto the wire, with per-connection concurrency isolation.
//!
//! ## Architecture
//!
//! Every connection is driven by a [`pipeline::DuplexPipeline`] running
//! three workers over bounded queues:
//!
//! ```text
//! socket --read--> ByteBuf --decode--> inbound queue --dispatch--> handler.on_read
//! handler.send --> outbound queue --encode--> socket.write --> callback(result)
//! ```
//!
//! Framing is TLV (`TAG | LENGTH | VALUE`); the typed codec layers a 2-byte
//! type code plus a MessagePack body on top and dispatches to message
//! structs registered in a [`codec::TypedConfig`].
//!
//! ## Example
//!
//! ```ignore
//! use wireline::codec::{TlvConfig, TypedConfig, TypedFrameDecoder, TypedFrameEncoder};
//! use wireline::net::{Server, ServerConfig};
//! use wireline::pipeline::{FnHandler, FnInitializer};
//!
//! let mut config = TypedConfig::new(TlvConfig::new(0xAA).with_frame_limit(4 * 1024 * 1024));
//! config.register::<Command>();
//! config.register::<Ack>();
//!
//! let decoder_config = config.clone();
//! let encoder_config = config.clone();
//! let initializer = FnInitializer::new(
//!     move || TypedFrameDecoder::new(decoder_config.clone()),
//!     move || TypedFrameEncoder::new(encoder_config.clone()),
//!     || {
//!         FnHandler::new().read(|channel, msg| async move {
//!             if let Some(command) = msg.as_any().downcast_ref::<Command>() {
//!                 channel.send(Box::new(Ack { id: command.id })).await?;
//!             }
//!             Ok(())
//!         })
//!     },
//! );
//!
//! let server = Server::new(ServerConfig::default(), initializer);
//! server.start().await?;
//! server.sync().await;
//! ```

pub mod buffer;
pub mod codec;
pub mod error;
pub mod net;
pub mod pipeline;

pub use buffer::ByteBuf;
pub use error::{Result, WirelineError};
pub use net::{Client, ClientConfig, Server, ServerConfig, TcpOptions};
pub use pipeline::{
    AckCorrelator, Channel, ChannelGroup, ChannelHandler, DuplexPipeline, FnHandler,
    FnInitializer, PipelineInitializer,
};
