use super::{Algorithm, Compressor};
use crate::error::BrokerError;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

/// Gzip stream, magic `0x1f 0x8b`.
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Gzip
    }

    fn compress(&self, data: &[u8], level: u8) -> Result<Vec<u8>, BrokerError> {
        let mut encoder = GzEncoder::new(data, Compression::new(level.min(9) as u32));
        let mut out = Vec::new();
        encoder
            .read_to_end(&mut out)
            .map_err(|e| BrokerError::InvalidData(format!("gzip compress failed: {e}")))?;
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, BrokerError> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| BrokerError::InvalidData(format!("gzip decompress failed: {e}")))?;
        Ok(out)
    }

    fn is_compressed(&self, data: &[u8]) -> bool {
        matches!(data, [0x1f, 0x8b, ..])
    }
}
