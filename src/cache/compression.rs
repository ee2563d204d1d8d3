//! Byte-level encoding of values written to the shared tier.
//!
//! The format is not self-describing: writer and reader must be configured with the same
//! [`CompressionMode`]. A mismatch surfaces as [`CacheError::Serialization`] on read.

use std::io::{Read, Write};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::error::{CacheError, CacheResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMode {
    None,
    #[default]
    GZip,
}

impl CompressionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::None => "none",
            CompressionMode::GZip => "gzip",
        }
    }

    pub fn encode(&self, data: &[u8]) -> CacheResult<Vec<u8>> {
        match self {
            CompressionMode::None => Ok(data.to_vec()),
            CompressionMode::GZip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| CacheError::serialization(format!("gzip encode: {e}")))?;
                encoder
                    .finish()
                    .map_err(|e| CacheError::serialization(format!("gzip encode: {e}")))
            }
        }
    }

    pub fn decode(&self, data: &[u8]) -> CacheResult<Vec<u8>> {
        match self {
            CompressionMode::None => Ok(data.to_vec()),
            CompressionMode::GZip => {
                let mut out = Vec::with_capacity(data.len().saturating_mul(2));
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| CacheError::serialization(format!("gzip decode: {e}")))?;
                Ok(out)
            }
        }
    }
}

impl FromStr for CompressionMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionMode::None),
            "gzip" => Ok(CompressionMode::GZip),
            other => Err(CacheError::validation(format!(
                "unknown compression type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
