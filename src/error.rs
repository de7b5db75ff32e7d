//! Error types for wireline.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all wireline operations.
///
/// The enum is `Clone` so a single failure can be delivered to more than one
/// observer (the send callback and `on_error` both see a failed write);
/// non-cloneable sources are held behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum WirelineError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// Malformed inbound frame. The decoder that produced this is poisoned
    /// and must not be fed again.
    #[error("{codec} decode error: {cause}")]
    Decode {
        /// Name of the decoder that failed.
        codec: &'static str,
        /// Failure detail.
        cause: String,
    },

    /// Outbound message could not be framed.
    #[error("{codec} encode error: {cause}")]
    Encode {
        /// Name of the encoder that failed.
        codec: &'static str,
        /// Failure detail.
        cause: String,
    },

    /// Frame exceeds the configured size limit (either direction).
    #[error("frame size {size} larger than limit {limit}")]
    FrameLimit {
        /// Total frame size (tag + length + value).
        size: u64,
        /// Configured limit.
        limit: u32,
    },

    /// MsgPack serialization error.
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[source] Arc<rmp_serde::encode::Error>),

    /// MsgPack deserialization error.
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[source] Arc<rmp_serde::decode::Error>),

    /// The pipeline is not running.
    #[error("pipeline closed")]
    Closed,

    /// The channel is no longer bound to a running pipeline.
    #[error("invalid channel")]
    InvalidChannel,

    /// The client is not running.
    #[error("client is not running")]
    ClientNotRunning,

    /// No acknowledgement arrived before the deadline.
    #[error("ack timeout")]
    AckTimeout,
}

impl WirelineError {
    /// Build a decode error for the named codec.
    pub fn decode(codec: &'static str, cause: impl Into<String>) -> Self {
        Self::Decode {
            codec,
            cause: cause.into(),
        }
    }

    /// Build an encode error for the named codec.
    pub fn encode(codec: &'static str, cause: impl Into<String>) -> Self {
        Self::Encode {
            codec,
            cause: cause.into(),
        }
    }
}

impl From<std::io::Error> for WirelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for WirelineError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::MsgPackEncode(Arc::new(err))
    }
}

impl From<rmp_serde::decode::Error> for WirelineError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::MsgPackDecode(Arc::new(err))
    }
}

/// Result type alias using WirelineError.
pub type Result<T> = std::result::Result<T, WirelineError>;
