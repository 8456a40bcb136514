//! Streaming tunables.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Tunables for opening and streaming virtual files.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StreamConfig {
    /// Largest physical window requested per fetch for open-ended reads.
    pub streaming_chunk: u64,
    /// Offset past which a short segment is blamed on the transport capping
    /// its response rather than on missing data.
    pub transport_buffer_limit: u64,
    /// Readers kept per handle; 0 disables the cache.
    pub reader_cache_capacity: usize,
    /// Fetch concurrency the caller runs with; sizes the segment cap.
    pub max_workers: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            streaming_chunk: 32 * MIB,
            transport_buffer_limit: 2 * MIB,
            reader_cache_capacity: 4,
            max_workers: 15,
        }
    }
}

impl StreamConfig {
    pub fn with_streaming_chunk(mut self, bytes: u64) -> Self {
        self.streaming_chunk = bytes.max(1);
        self
    }

    pub fn with_transport_buffer_limit(mut self, bytes: u64) -> Self {
        self.transport_buffer_limit = bytes;
        self
    }

    pub fn with_reader_cache_capacity(mut self, capacity: usize) -> Self {
        self.reader_cache_capacity = capacity;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Upper bound on segments planned for a request of `range_len` bytes.
    ///
    /// Scales with the worker count; large requests get more headroom.
    pub fn max_segments_for(&self, range_len: u64) -> usize {
        if range_len > 50 * MIB {
            (self.max_workers * 12).clamp(30, 150)
        } else {
            (self.max_workers * 8).clamp(20, 100)
        }
    }
}
