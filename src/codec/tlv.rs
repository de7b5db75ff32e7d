//! TLV (Tag-Length-Value) frame codec.
//!
//! Wire layout:
//!
//! ```text
//! +----------+-----------+-----------+
//! |    TAG   |  LENGTH   |   VALUE   |
//! | (1 byte) | (4 bytes) | (payload) |
//! +----------+-----------+-----------+
//! ```
//!
//! `TAG` must equal the configured tag byte; `LENGTH` is a big-endian
//! unsigned 32-bit count of `VALUE` bytes. The decoder is a resumable state
//! machine, so a frame may arrive split across any number of reads.

use bytes::Bytes;

use crate::buffer::ByteBuf;
use crate::error::{Result, WirelineError};

use super::{FrameDecoder, FrameEncoder};

/// Size of the tag field.
pub const TAG_SIZE: usize = 1;
/// Size of the length field.
pub const LENGTH_SIZE: usize = 4;

/// Configuration shared by [`TlvFrameDecoder`] and [`TlvFrameEncoder`].
#[derive(Debug, Clone, Copy)]
pub struct TlvConfig {
    /// Expected tag byte at the start of every frame.
    pub tag: u8,
    /// Maximum total frame size (`1 + 4 + LENGTH`); 0 disables the check.
    pub frame_limit: u32,
}

impl TlvConfig {
    /// Config with the given tag and no frame limit.
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            frame_limit: 0,
        }
    }

    /// Set the maximum total frame size.
    pub fn with_frame_limit(mut self, frame_limit: u32) -> Self {
        self.frame_limit = frame_limit;
        self
    }
}

/// Bytes-to-bytes decoder producing one `VALUE` payload per frame.
///
/// Parsing progress is latched across calls: a partially received frame
/// leaves `has_tag`/`has_length` set and resumes on the next call.
pub struct TlvFrameDecoder {
    config: TlvConfig,
    has_tag: bool,
    has_length: bool,
    length: u32,
}

impl TlvFrameDecoder {
    /// Create a decoder for the given configuration.
    pub fn new(config: TlvConfig) -> Self {
        Self {
            config,
            has_tag: false,
            has_length: false,
            length: 0,
        }
    }

    fn reset_latches(&mut self) {
        self.has_tag = false;
        self.has_length = false;
        self.length = 0;
    }

    fn fail(&self, cause: impl Into<String>) -> WirelineError {
        WirelineError::decode("TlvFrameDecoder", cause)
    }
}

impl FrameDecoder for TlvFrameDecoder {
    type Item = Bytes;

    fn decode(&mut self, input: &mut ByteBuf) -> Result<Option<Bytes>> {
        // Parse T(tag)
        if !self.has_tag {
            if input.readable_bytes() < TAG_SIZE {
                return Ok(None);
            }
            let tag = input.read_bytes(TAG_SIZE)[0];
            if tag != self.config.tag {
                return Err(self.fail("illegal tag found"));
            }
            self.has_tag = true;
        }

        // Parse L(length)
        if self.has_tag && !self.has_length {
            if input.readable_bytes() < LENGTH_SIZE {
                return Ok(None);
            }
            let raw = input.read_bytes(LENGTH_SIZE);
            self.length = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            self.has_length = true;
        }

        // Parse V(value)
        if self.has_tag && self.has_length {
            if input.readable_bytes() < self.length as usize {
                return Ok(None);
            }
            let value = input.read_bytes(self.length as usize);

            let frame_size = (TAG_SIZE + LENGTH_SIZE) as u64 + value.len() as u64;
            if self.config.frame_limit > 0 && frame_size > u64::from(self.config.frame_limit) {
                return Err(WirelineError::FrameLimit {
                    size: frame_size,
                    limit: self.config.frame_limit,
                });
            }

            self.reset_latches();
            return Ok(Some(Bytes::from(value)));
        }

        Ok(None)
    }
}

/// Bytes-to-bytes encoder wrapping one payload into a complete frame.
pub struct TlvFrameEncoder {
    config: TlvConfig,
}

impl TlvFrameEncoder {
    /// Create an encoder for the given configuration.
    pub fn new(config: TlvConfig) -> Self {
        Self { config }
    }
}

impl FrameEncoder for TlvFrameEncoder {
    type Item = Bytes;

    fn encode(&mut self, payload: Bytes) -> Result<Vec<u8>> {
        let frame_size = (TAG_SIZE + LENGTH_SIZE) as u64 + payload.len() as u64;
        if self.config.frame_limit > 0 && frame_size > u64::from(self.config.frame_limit) {
            return Err(WirelineError::FrameLimit {
                size: frame_size,
                limit: self.config.frame_limit,
            });
        }

        let mut frame = Vec::with_capacity(frame_size as usize);
        frame.push(self.config.tag);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        debug_assert_eq!(frame.len() as u64, frame_size);

        Ok(frame)
    }
}
