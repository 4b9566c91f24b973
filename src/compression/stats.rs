use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomics-backed accumulator so it can be shared across concurrent
/// publish/receive paths without an external lock.
#[derive(Default)]
pub struct CompressionStats {
    total_messages: AtomicU64,
    compressed_messages: AtomicU64,
    skipped_messages: AtomicU64,
    original_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
    compress_nanos: AtomicU64,
    decompress_nanos: AtomicU64,
}

/// Point-in-time snapshot with derived fields computed from the atomics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionSnapshot {
    pub total_messages: u64,
    pub compressed_messages: u64,
    pub skipped_messages: u64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub average_compression_ratio: f64,
    pub bytes_saved: u64,
    pub compression_rate: f64,
    pub average_compress_duration: Duration,
    pub average_decompress_duration: Duration,
}

impl CompressionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_compressed(&self, original_len: usize, compressed_len: usize, elapsed: Duration) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.compressed_messages.fetch_add(1, Ordering::Relaxed);
        self.original_bytes.fetch_add(original_len as u64, Ordering::Relaxed);
        self.compressed_bytes.fetch_add(compressed_len as u64, Ordering::Relaxed);
        self.compress_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, original_len: usize) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.skipped_messages.fetch_add(1, Ordering::Relaxed);
        self.original_bytes.fetch_add(original_len as u64, Ordering::Relaxed);
        self.compressed_bytes.fetch_add(original_len as u64, Ordering::Relaxed);
    }

    pub fn record_decompress(&self, elapsed: Duration) {
        self.decompress_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CompressionSnapshot {
        let total = self.total_messages.load(Ordering::Relaxed);
        let compressed = self.compressed_messages.load(Ordering::Relaxed);
        let skipped = self.skipped_messages.load(Ordering::Relaxed);
        let original_bytes = self.original_bytes.load(Ordering::Relaxed);
        let compressed_bytes = self.compressed_bytes.load(Ordering::Relaxed);
        let compress_nanos = self.compress_nanos.load(Ordering::Relaxed);
        let decompress_nanos = self.decompress_nanos.load(Ordering::Relaxed);

        let average_compression_ratio = if original_bytes == 0 {
            0.0
        } else {
            compressed_bytes as f64 / original_bytes as f64
        };
        let bytes_saved = original_bytes.saturating_sub(compressed_bytes);
        let compression_rate = if total == 0 { 0.0 } else { compressed as f64 / total as f64 };
        let average_compress_duration = if compressed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(compress_nanos / compressed)
        };
        let average_decompress_duration = if compressed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(decompress_nanos / compressed)
        };

        CompressionSnapshot {
            total_messages: total,
            compressed_messages: compressed,
            skipped_messages: skipped,
            original_bytes,
            compressed_bytes,
            average_compression_ratio,
            bytes_saved,
            compression_rate,
            average_compress_duration,
            average_decompress_duration,
        }
    }
}
