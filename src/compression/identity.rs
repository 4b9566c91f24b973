use super::{Algorithm, Compressor};
use crate::error::BrokerError;

/// Pass-through codec: no framing, no magic bytes. Used when compression is
/// disabled or the payload is already below the size threshold worth compressing.
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Identity
    }

    fn compress(&self, data: &[u8], _level: u8) -> Result<Vec<u8>, BrokerError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, BrokerError> {
        Ok(data.to_vec())
    }

    fn is_compressed(&self, _data: &[u8]) -> bool {
        false
    }
}
