//! Typed message codec: type-code dispatch over TLV framing.
//!
//! The TLV `VALUE` carries a 2-byte big-endian type code followed by a
//! MessagePack body:
//!
//! ```text
//! +----------+-----------+---------------------------+
//! |    TAG   |  LENGTH   |           VALUE           |
//! | (1 byte) | (4 bytes) |   2 bytes   | serialized  |
//! |          |           |  type code  |    body     |
//! +----------+-----------+---------------------------+
//! ```
//!
//! Applications implement [`TypeCode`] for each message struct and register
//! the struct in a [`TypedConfig`]. Decoded messages surface as
//! [`Box<dyn Message>`] and are recovered with [`Message::as_any`]
//! downcasts; anything a pipeline sends must be a [`Message`], which is
//! what guarantees every outbound value carries a type code.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use wireline::codec::{TlvConfig, TypeCode, TypedConfig};
//!
//! #[derive(Serialize, Deserialize, Default)]
//! struct Ping { seq: u32 }
//!
//! impl TypeCode for Ping {
//!     fn type_code(&self) -> u16 { 1 }
//! }
//!
//! let mut config = TypedConfig::new(TlvConfig::new(0xAA));
//! config.register::<Ping>();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::buffer::ByteBuf;
use crate::error::{Result, WirelineError};

use super::msgpack::MsgPackCodec;
use super::tlv::{TlvConfig, TlvFrameDecoder, TlvFrameEncoder};
use super::{FrameDecoder, FrameEncoder};

/// Size of the type-code prefix inside the TLV value.
pub const TYPE_CODE_SIZE: usize = 2;

/// Supplies the 2-byte wire identifier of a message type.
pub trait TypeCode {
    /// Type code written before the serialized body.
    fn type_code(&self) -> u16;
}

/// Object-safe form of a typed message flowing through a pipeline.
///
/// Implemented automatically for every `TypeCode + Serialize` type; do not
/// implement it by hand. Inbound messages are recovered with
/// [`Message::as_any`]:
///
/// ```ignore
/// if let Some(ping) = msg.as_any().downcast_ref::<Ping>() { ... }
/// ```
pub trait Message: Send + Any {
    /// Type code written before the serialized body.
    fn type_code(&self) -> u16;

    /// Serialize the message body (without the type-code prefix).
    fn encode_body(&self) -> Result<Vec<u8>>;

    /// Borrowed downcast access.
    fn as_any(&self) -> &dyn Any;

    /// Owned downcast access.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> Message for T
where
    T: TypeCode + Serialize + Send + Any,
{
    fn type_code(&self) -> u16 {
        TypeCode::type_code(self)
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        MsgPackCodec::encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Message>> + Send + Sync>;

/// Configuration for the typed codec: the embedded TLV framing config plus
/// the registry mapping type codes to message constructors.
///
/// Populate during setup, then share (it is cheap to clone) between the
/// decoder and encoder builders of an initializer. The registry is
/// read-only while pipelines run.
#[derive(Clone)]
pub struct TypedConfig {
    /// Framing configuration for the underlying TLV layer.
    pub tlv: TlvConfig,
    constructors: HashMap<u16, DecodeFn>,
}

impl TypedConfig {
    /// Create an empty registry over the given TLV configuration.
    pub fn new(tlv: TlvConfig) -> Self {
        Self {
            tlv,
            constructors: HashMap::new(),
        }
    }

    /// Register message type `T` under the code reported by a
    /// default-constructed instance. Registering the same code again
    /// overwrites the previous entry.
    pub fn register<T>(&mut self)
    where
        T: TypeCode + Default + Serialize + DeserializeOwned + Send + Any,
    {
        let code = T::default().type_code();
        self.constructors.insert(
            code,
            Arc::new(|body: &[u8]| {
                let value: T = MsgPackCodec::decode(body)?;
                Ok(Box::new(value) as Box<dyn Message>)
            }),
        );
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// True when no message type is registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    fn decode_fn(&self, type_code: u16) -> Option<&DecodeFn> {
        self.constructors.get(&type_code)
    }
}

/// Decoder from the byte stream to registered message values.
pub struct TypedFrameDecoder {
    config: TypedConfig,
    tlv: TlvFrameDecoder,
}

impl TypedFrameDecoder {
    /// Create a decoder over the given configuration.
    pub fn new(config: TypedConfig) -> Self {
        let tlv = TlvFrameDecoder::new(config.tlv);
        Self { config, tlv }
    }

    fn fail(&self, cause: impl Into<String>) -> WirelineError {
        WirelineError::decode("TypedFrameDecoder", cause)
    }
}

impl FrameDecoder for TypedFrameDecoder {
    type Item = Box<dyn Message>;

    fn decode(&mut self, input: &mut ByteBuf) -> Result<Option<Box<dyn Message>>> {
        if input.readable_bytes() == 0 {
            return Ok(None);
        }

        let payload = match self.tlv.decode(input)? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        if payload.len() < TYPE_CODE_SIZE {
            return Err(self.fail("illegal payload"));
        }
        let type_code = u16::from_be_bytes([payload[0], payload[1]]);
        let body = &payload[TYPE_CODE_SIZE..];

        match self.config.decode_fn(type_code) {
            Some(decode) => match decode(body) {
                Ok(message) => Ok(Some(message)),
                Err(err) => Err(self.fail(err.to_string())),
            },
            // Unregistered type code: the frame is consumed and nothing is
            // emitted, so unknown traffic passes without tearing the
            // connection down.
            None => Ok(None),
        }
    }
}

/// Encoder from registered message values to complete frames.
pub struct TypedFrameEncoder {
    tlv: TlvFrameEncoder,
}

impl TypedFrameEncoder {
    /// Create an encoder over the given configuration.
    pub fn new(config: TypedConfig) -> Self {
        Self {
            tlv: TlvFrameEncoder::new(config.tlv),
        }
    }
}

impl FrameEncoder for TypedFrameEncoder {
    type Item = Box<dyn Message>;

    fn encode(&mut self, msg: Box<dyn Message>) -> Result<Vec<u8>> {
        let type_code = msg.type_code();
        let body = msg
            .encode_body()
            .map_err(|err| WirelineError::encode("TypedFrameEncoder", err.to_string()))?;

        let mut payload = Vec::with_capacity(TYPE_CODE_SIZE + body.len());
        payload.extend_from_slice(&type_code.to_be_bytes());
        payload.extend_from_slice(&body);

        self.tlv.encode(Bytes::from(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Command {
        id: i64,
        name: String,
    }

    impl TypeCode for Command {
        fn type_code(&self) -> u16 {
            1
        }
    }

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Ack {
        id: i64,
    }

    impl TypeCode for Ack {
        fn type_code(&self) -> u16 {
            2
        }
    }

    fn config() -> TypedConfig {
        let mut config = TypedConfig::new(TlvConfig::new(0xAA).with_frame_limit(4 * 1024 * 1024));
        config.register::<Command>();
        config.register::<Ack>();
        config
    }

    fn feed(frame: &[u8]) -> ByteBuf {
        let mut buf = ByteBuf::new(64);
        buf.write_bytes(frame);
        buf
    }

    #[test]
    fn test_typed_roundtrip() {
        let original = Command {
            id: 42,
            name: "m".to_string(),
        };

        let mut encoder = TypedFrameEncoder::new(config());
        let frame = encoder.encode(Box::new(original)).unwrap();

        let mut decoder = TypedFrameDecoder::new(config());
        let mut buf = feed(&frame);
        let message = decoder.decode(&mut buf).unwrap().unwrap();

        let command = message.as_any().downcast_ref::<Command>().unwrap();
        assert_eq!(command.id, 42);
        assert_eq!(command.name, "m");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_distinct_types_dispatch_by_code() {
        let mut encoder = TypedFrameEncoder::new(config());
        let mut stream = encoder
            .encode(Box::new(Command {
                id: 7,
                name: "seven".to_string(),
            }))
            .unwrap();
        stream.extend(encoder.encode(Box::new(Ack { id: 7 })).unwrap());

        let mut decoder = TypedFrameDecoder::new(config());
        let mut buf = feed(&stream);

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(first.as_any().downcast_ref::<Command>().is_some());

        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.as_any().downcast_ref::<Ack>().unwrap().id, 7);
    }

    #[test]
    fn test_unknown_type_code_emits_nothing() {
        // Encode with a registry that knows Ack, decode with one that does not.
        let mut encoder = TypedFrameEncoder::new(config());
        let frame = encoder.encode(Box::new(Ack { id: 9 })).unwrap();

        let mut sparse = TypedConfig::new(TlvConfig::new(0xAA));
        sparse.register::<Command>();
        let mut decoder = TypedFrameDecoder::new(sparse);

        let mut buf = feed(&frame);
        let result = decoder.decode(&mut buf).unwrap();

        assert!(result.is_none());
        // The frame was still consumed.
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_payload_shorter_than_type_code() {
        // A valid TLV frame whose value is a single byte.
        let mut tlv = TlvFrameEncoder::new(TlvConfig::new(0xAA));
        let frame = tlv.encode(Bytes::from_static(&[0x01])).unwrap();

        let mut decoder = TypedFrameDecoder::new(config());
        let mut buf = feed(&frame);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(err.to_string().contains("illegal payload"));
    }

    #[test]
    fn test_corrupt_body_is_decode_error() {
        let mut payload = 1u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"\xc1\xc1\xc1"); // 0xc1 is never valid msgpack
        let mut tlv = TlvFrameEncoder::new(TlvConfig::new(0xAA));
        let frame = tlv.encode(Bytes::from(payload)).unwrap();

        let mut decoder = TypedFrameDecoder::new(config());
        let mut buf = feed(&frame);

        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_duplicate_registration_overwrites() {
        #[derive(Serialize, Deserialize, Default)]
        struct CommandV2 {
            id: i64,
        }
        impl TypeCode for CommandV2 {
            fn type_code(&self) -> u16 {
                1
            }
        }

        let mut config = config();
        assert_eq!(config.len(), 2);
        config.register::<CommandV2>();
        assert_eq!(config.len(), 2);

        let mut encoder = TypedFrameEncoder::new(config.clone());
        let frame = encoder.encode(Box::new(CommandV2 { id: 3 })).unwrap();

        let mut decoder = TypedFrameDecoder::new(config);
        let mut buf = feed(&frame);
        let message = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(message.as_any().downcast_ref::<CommandV2>().is_some());
    }

    #[test]
    fn test_empty_buffer_decodes_nothing() {
        let mut decoder = TypedFrameDecoder::new(config());
        let mut buf = ByteBuf::new(8);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
