//! Runtime configuration
//!
//! Serde-deserializable config structs with per-field defaults. Operators
//! override individual fields; anything omitted takes the documented
//! default.

use serde::{Deserialize, Serialize};

/// Configuration for the CDC pipeline (shard buffer + coordinator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CdcConfig {
    /// Shard-side buffer capacity; overflow drops oldest events.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Per-namespace event count that triggers a coordinator flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Interval of the coordinator's periodic flush tick, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_max_buffer_size() -> usize {
    1000
}

fn default_flush_threshold() -> usize {
    1000
}

fn default_flush_interval_ms() -> u64 {
    200
}

impl Default for CdcConfig {
    fn default() -> Self {
        CdcConfig {
            max_buffer_size: default_max_buffer_size(),
            flush_threshold: default_flush_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Retry policy for the durable writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Uniform jitter factor in [0, 1): delay scales by (1 + U[0, jitter)).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// A policy that never sleeps, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        RetryConfig {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Backoff delay (before jitter) for a zero-based attempt index.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// Configuration for the shard-side chunk store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkConfig {
    /// Encoded-payload size that triggers a flush.
    #[serde(default = "default_chunk_max_bytes")]
    pub max_bytes: usize,
    /// Triple count that triggers a flush.
    #[serde(default = "default_chunk_max_triples")]
    pub max_triples: usize,
}

fn default_chunk_max_bytes() -> usize {
    crate::limits::MAX_CHUNK_BYTES
}

fn default_chunk_max_triples() -> usize {
    crate::limits::MAX_TRIPLES_PER_CHUNK
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            max_bytes: default_chunk_max_bytes(),
            max_triples: default_chunk_max_triples(),
        }
    }
}
