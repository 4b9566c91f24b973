use super::{Algorithm, Compressor};
use crate::error::BrokerError;

/// `lz4_flex` block format carries no self-describing magic, so this crate
/// frames it with an explicit 4-byte big-endian magic (`b"LZ4\0"`) followed by
/// a 4-byte big-endian original-length prefix (required by the block API to
/// size the decompression buffer).
const MAGIC: [u8; 4] = *b"LZ4\0";

pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Lz4
    }

    fn compress(&self, data: &[u8], _level: u8) -> Result<Vec<u8>, BrokerError> {
        let compressed = lz4_flex::compress(data);
        let mut framed = Vec::with_capacity(MAGIC.len() + 4 + compressed.len());
        framed.extend_from_slice(&MAGIC);
        framed.extend_from_slice(&(data.len() as u32).to_be_bytes());
        framed.extend_from_slice(&compressed);
        Ok(framed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, BrokerError> {
        if data.len() < 8 || data[..4] != MAGIC {
            return Err(BrokerError::InvalidData(
                "lz4 frame missing magic header".to_string(),
            ));
        }
        let original_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        lz4_flex::decompress(&data[8..], original_len)
            .map_err(|e| BrokerError::InvalidData(format!("lz4 decompress failed: {e}")))
    }

    fn is_compressed(&self, data: &[u8]) -> bool {
        data.len() >= 8 && data[..4] == MAGIC
    }
}
