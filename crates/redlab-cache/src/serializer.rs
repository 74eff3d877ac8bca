//! Value encoding for cache entries.

use crate::finite::ensure_finite;
use redlab_core::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Wire format of a cache entry, chosen per cached call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// UTF-8 JSON. Readable from `redis-cli`, but only for values with a
    /// JSON mapping: maps keyed by tuples or structs are rejected.
    #[default]
    Json,
    /// MessagePack with named struct fields. Accepts any serde value.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl SerializationFormat {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "msgpack",
        }
    }

    /// Encodes `value` into bytes.
    ///
    /// A failure here means the format does not fit the value; retrying
    /// will not help. JSON refuses NaN and infinities instead of writing
    /// them as `null`.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> CacheResult<Vec<u8>> {
        let encoded = match self {
            Self::Json => ensure_finite(value)
                .map_err(|e| e.to_string())
                .and_then(|()| serde_json::to_vec(value).map_err(|e| e.to_string())),
            Self::MessagePack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
        };

        encoded.map_err(|message| CacheError::Serialization {
            format: self.name(),
            message,
        })
    }

    /// Decodes bytes produced by [`encode`](Self::encode).
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> CacheResult<T> {
        let decoded = match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Self::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        };

        decoded.map_err(|message| CacheError::Deserialization {
            format: self.name(),
            message,
        })
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode a value using the specified format.
pub fn encode<T: Serialize + ?Sized>(format: SerializationFormat, value: &T) -> CacheResult<Vec<u8>> {
    format.encode(value)
}

/// Decode a value using the specified format.
pub fn decode<T: DeserializeOwned>(format: SerializationFormat, bytes: &[u8]) -> CacheResult<T> {
    format.decode(bytes)
}
