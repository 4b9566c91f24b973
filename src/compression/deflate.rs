use super::{Algorithm, Compressor};
use crate::error::BrokerError;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

/// Raw zlib stream, magic `0x78 {0x9c | 0xda | 0x01}` per the stream's FLEVEL bits.
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Deflate
    }

    fn compress(&self, data: &[u8], level: u8) -> Result<Vec<u8>, BrokerError> {
        let mut encoder = ZlibEncoder::new(data, Compression::new(level.min(9) as u32));
        let mut out = Vec::new();
        encoder
            .read_to_end(&mut out)
            .map_err(|e| BrokerError::InvalidData(format!("deflate compress failed: {e}")))?;
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, BrokerError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| BrokerError::InvalidData(format!("deflate decompress failed: {e}")))?;
        Ok(out)
    }

    fn is_compressed(&self, data: &[u8]) -> bool {
        matches!(data, [0x78, 0x9c, ..] | [0x78, 0xda, ..] | [0x78, 0x01, ..])
    }
}
