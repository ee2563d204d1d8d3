//! Serialization boundary between typed values and the byte-oriented tiers.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{CacheError, CacheResult};

/// Converts entity values to and from the bytes stored in the cache tiers.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;
}

/// JSON codec (the default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    #[inline]
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(CacheError::serialization)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(CacheError::serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Manifest {
        revision: String,
        paths: Vec<String>,
    }

    #[test]
    fn test_json_roundtrip() {
        let manifest = Manifest {
            revision: "abc123".to_string(),
            paths: vec!["deploy.yaml".to_string()],
        };

        let bytes = JsonCodec.encode(&manifest).expect("encode");
        let back: Manifest = JsonCodec.decode(&bytes).expect("decode");

        assert_eq!(back, manifest);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = JsonCodec
            .decode::<Manifest>(b"\x1f\x8b not json")
            .expect_err("should fail");
        assert!(matches!(err, CacheError::Serialization { .. }));
    }
}
