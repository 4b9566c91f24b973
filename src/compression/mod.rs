//! Pluggable payload compression with magic-byte sniffing and a shared
//! statistics accumulator.
//!
//! Each [`Compressor`] declares an [`Algorithm`] tag and round-trips bytes:
//! `decompress(compress(x)) == x` holds for every byte string, including the
//! empty one.

mod deflate;
mod gzip;
mod identity;
mod lz4;
mod stats;

pub use deflate::DeflateCompressor;
pub use gzip::GzipCompressor;
pub use identity::IdentityCompressor;
pub use lz4::Lz4Compressor;
pub use stats::CompressionStats;

use crate::error::BrokerError;

/// Compression algorithm tag, carried in the envelope header so the receiving
/// side knows which codec to invoke regardless of what the registry on this
/// process has registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Algorithm {
    Identity,
    Deflate,
    Gzip,
    Lz4,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Identity => "identity",
            Algorithm::Deflate => "deflate",
            Algorithm::Gzip => "gzip",
            Algorithm::Lz4 => "lz4",
        }
    }
}

/// A compression codec. Implementors must be safe to share across concurrent
/// publish/receive paths: the codec itself holds no mutable state.
pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Compression level in `[0, 9]`; `0` means "fastest / effectively none".
    fn compress(&self, data: &[u8], level: u8) -> Result<Vec<u8>, BrokerError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, BrokerError>;

    /// Magic-byte sniff: does `data` look like this codec's output?
    fn is_compressed(&self, data: &[u8]) -> bool;
}

/// Registry of available codecs, selected by magic-byte sniffing on decode
/// and by explicit [`Algorithm`] selection on encode.
#[derive(Clone)]
pub struct CompressorRegistry {
    identity: std::sync::Arc<IdentityCompressor>,
    deflate: std::sync::Arc<DeflateCompressor>,
    gzip: std::sync::Arc<GzipCompressor>,
    lz4: std::sync::Arc<Lz4Compressor>,
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self {
            identity: std::sync::Arc::new(IdentityCompressor),
            deflate: std::sync::Arc::new(DeflateCompressor),
            gzip: std::sync::Arc::new(GzipCompressor),
            lz4: std::sync::Arc::new(Lz4Compressor),
        }
    }
}

impl CompressorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, algorithm: Algorithm) -> &dyn Compressor {
        match algorithm {
            Algorithm::Identity => self.identity.as_ref(),
            Algorithm::Deflate => self.deflate.as_ref(),
            Algorithm::Gzip => self.gzip.as_ref(),
            Algorithm::Lz4 => self.lz4.as_ref(),
        }
    }

    /// Sniff `data`'s magic bytes to find the codec that produced it. Falls
    /// back to [`Algorithm::Identity`] when nothing matches.
    pub fn detect(&self, data: &[u8]) -> Algorithm {
        if self.gzip.is_compressed(data) {
            Algorithm::Gzip
        } else if self.deflate.is_compressed(data) {
            Algorithm::Deflate
        } else if self.lz4.is_compressed(data) {
            Algorithm::Lz4
        } else {
            Algorithm::Identity
        }
    }

    pub fn compress(&self, algorithm: Algorithm, data: &[u8], level: u8) -> Result<Vec<u8>, BrokerError> {
        self.get(algorithm).compress(data, level)
    }

    /// Decompress by sniffing the magic bytes rather than trusting a caller-supplied tag.
    pub fn decompress_sniffed(&self, data: &[u8]) -> Result<Vec<u8>, BrokerError> {
        self.get(self.detect(data)).decompress(data)
    }
}
