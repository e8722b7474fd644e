//! Pluggable serialization capability.

use crate::CacheError;
use serde::{de::DeserializeOwned, Serialize};

/// How timestamp fields in the encoded payload should be represented.
///
/// The engine itself carries no notion of timezones; this only exists so a
/// caller can request a consistent representation across serializer
/// backends. The bundled serializers pass it through unchanged since the
/// value type's own `Serialize` impl governs how its timestamp fields are
/// encoded — a `TimestampPolicy` only has an effect for value types that
/// consult it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    #[default]
    None,
    Utc,
    Local,
}

/// Encode/decode an application value as bytes.
///
/// The engine is agnostic to the wire format; the same engine can support
/// multiple on-disk encodings across a migration by swapping this
/// capability.
pub trait Serializer: Send + Sync + Clone + 'static {
    /// Name of the serializer, surfaced for diagnostics.
    fn name(&self) -> &str;

    /// Encode a value. Fails with `Serialization` on codec failure.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError>;

    /// Decode a value. Fails with `Deserialization` if the bytes don't
    /// decode under the expected schema.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError>;

    /// Encode with an explicit timestamp policy. Default ignores the policy
    /// and delegates to [`Serializer::serialize`]; see [`TimestampPolicy`].
    fn serialize_with_policy<T: Serialize>(
        &self,
        value: &T,
        _policy: TimestampPolicy,
    ) -> Result<Vec<u8>, CacheError> {
        self.serialize(value)
    }
}

/// JSON serializer (default). Human-readable, widely compatible.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

/// MessagePack serializer. Enable with the `msgpack` feature.
#[cfg(feature = "msgpack")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

#[cfg(feature = "msgpack")]
impl Serializer for MsgPackSerializer {
    fn name(&self) -> &str {
        "msgpack"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        rmp_serde::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

/// Bincode serializer. Enable with the `bincode` feature.
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

#[cfg(feature = "bincode")]
impl Serializer for BincodeSerializer {
    fn name(&self) -> &str {
        "bincode"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        let (val, _len) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CacheError::Deserialization(e.to_string()))?;
        Ok(val)
    }
}
