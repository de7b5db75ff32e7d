//! MessagePack serialization using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so structs become maps keyed by field
//! name rather than positional arrays. Peers in other languages (and the
//! interop contract of the typed wire format) expect the map form, and it
//! keeps the encoding of a given value byte-identical across
//! implementations.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for typed message bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MessagePack bytes (struct-as-map format).
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MessagePack bytes into a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
