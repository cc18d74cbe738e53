//! Transaction ids
//!
//! A `TxId` is a 26-character ULID (Crockford base32). Each shard holds a
//! [`TxIdGenerator`] that produces monotonically increasing ids even when
//! several are drawn within the same millisecond.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::{Generator, Ulid};

/// A 26-character ULID transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Ulid);

impl TxId {
    /// Parse a canonical 26-character ULID string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 26 {
            return Err(Error::bad_input(format!(
                "tx id must be 26 characters, got {}",
                s.len()
            )));
        }
        Ulid::from_string(s)
            .map(TxId)
            .map_err(|e| Error::bad_input(format!("invalid tx id: {}", e)))
    }

    /// The raw 128-bit value, for fixed-width binary columns.
    pub fn to_u128(self) -> u128 {
        self.0 .0
    }

    /// Rebuild from a 128-bit value read out of a binary column.
    pub fn from_u128(raw: u128) -> Self {
        TxId(Ulid(raw))
    }

    /// Millisecond timestamp component of the ULID.
    pub fn timestamp_ms(self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic ULID generator, one per shard.
///
/// Within a shard, successively drawn ids strictly increase; the underlying
/// generator increments the random component when the clock has not moved.
pub struct TxIdGenerator {
    inner: Generator,
}

impl TxIdGenerator {
    /// Create a fresh generator.
    pub fn new() -> Self {
        TxIdGenerator {
            inner: Generator::new(),
        }
    }

    /// Draw the next transaction id.
    pub fn next(&mut self) -> Result<TxId> {
        self.inner
            .generate()
            .map(TxId)
            .map_err(|e| Error::permanent(format!("ulid overflow: {}", e)))
    }
}

impl Default for TxIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let id = TxId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert_eq!(id.to_string(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(TxId::parse("01ARZ3NDEK").is_err());
        assert!(TxId::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_alphabet() {
        // 'U' is not in the Crockford alphabet
        assert!(TxId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAU").is_err());
    }

    #[test]
    fn test_generator_is_monotonic() {
        let mut gen = TxIdGenerator::new();
        let mut prev = gen.next().unwrap();
        for _ in 0..1000 {
            let next = gen.next().unwrap();
            assert!(next > prev, "ids must strictly increase");
            prev = next;
        }
    }

    #[test]
    fn test_u128_round_trip() {
        let mut gen = TxIdGenerator::new();
        let id = gen.next().unwrap();
        assert_eq!(TxId::from_u128(id.to_u128()), id);
    }

    #[test]
    fn test_serde_is_transparent_string() {
        let id = TxId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"01ARZ3NDEKTSV4RRFFQ69G5FAV\"");
        let back: TxId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
