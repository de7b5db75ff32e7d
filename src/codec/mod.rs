//! Frame codecs: byte-stream framing and message (de)serialization.
//!
//! A pipeline owns one [`FrameDecoder`] and one [`FrameEncoder`], both
//! produced by the application's
//! [`PipelineInitializer`](crate::pipeline::PipelineInitializer). The
//! decoder turns the inbound byte stream into messages; the encoder turns
//! outbound messages back into wire frames.
//!
//! Two codec families ship with the crate:
//!
//! - [`tlv`]: raw `TAG | LENGTH | VALUE` framing over opaque payloads.
//! - [`typed`]: a 2-byte type code plus a MessagePack body on top of TLV,
//!   dispatching to registered message types.

pub mod msgpack;
pub mod tlv;
pub mod typed;

pub use msgpack::MsgPackCodec;
pub use tlv::{TlvConfig, TlvFrameDecoder, TlvFrameEncoder};
pub use typed::{Message, TypeCode, TypedConfig, TypedFrameDecoder, TypedFrameEncoder};

use crate::buffer::ByteBuf;
use crate::error::Result;

/// Incremental decoder from a byte stream to messages.
///
/// `decode` is called with the connection's read buffer each time bytes
/// arrive, and repeatedly until it reports that more data is needed:
///
/// - `Ok(Some(item))`: one complete message was consumed from the buffer.
/// - `Ok(None)`: not enough bytes yet; partial progress is latched inside
///   the decoder and resumed on the next call.
/// - `Err(_)`: the stream is malformed. The decoder is poisoned and must
///   not be fed again.
pub trait FrameDecoder: Send {
    /// Message type this decoder produces.
    type Item: Send + 'static;

    /// Consume as much of `input` as one message requires.
    fn decode(&mut self, input: &mut ByteBuf) -> Result<Option<Self::Item>>;
}

/// Encoder from one message to a complete wire frame.
pub trait FrameEncoder: Send {
    /// Message type this encoder accepts.
    type Item: Send + 'static;

    /// Produce the full frame for `msg`.
    fn encode(&mut self, msg: Self::Item) -> Result<Vec<u8>>;
}
