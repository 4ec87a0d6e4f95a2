use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::error::{DecodeError, EncodeError};

/// Serializes typed values to bytes and back. Every publish and subscribe
/// call is parameterized by exactly one codec; the content type it reports
/// travels in the message envelope so operators can tell payload formats
/// apart. Publisher and subscriber of a queue agree on the codec by
/// queue/routing-key naming convention, not by sniffing the tag.
pub trait Codec: Clone + Send + Sync + 'static {
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodeError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

/// Human-readable, self-describing JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Json)
    }
}

/// Compact binary payloads via bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        Ok(bincode::serialize(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        bincode::deserialize(bytes).map_err(DecodeError::Binary)
    }
}
