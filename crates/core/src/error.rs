//! Error types for the Trellis core
//!
//! One unified error type serves all crates in the workspace. We use
//! `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Categories
//!
//! - **BadInput**: caller-supplied data fails validation
//! - **BadFormat**: magic mismatch or unsupported version in a container
//! - **Corrupt**: checksum mismatch, truncation, inconsistent offsets
//! - **OutOfOrder / NotRegistered**: CDC sequence-contract violations
//! - **NotFound**: a resource that simply is not there
//! - **Transient / Permanent**: I/O failures, split by retryability
//!
//! The CDC durable writer uses [`Error::is_retryable`] to decide whether a
//! failed blob write goes through backoff or aborts immediately.

use std::io;
use thiserror::Error;

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the Trellis core
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied data failed validation (entity id, predicate, vector set, ...)
    #[error("bad input: {0}")]
    BadInput(String),

    /// Container magic or version did not match what the decoder expects
    #[error("bad format: {0}")]
    BadFormat(String),

    /// Data corruption detected (checksum mismatch, truncation, bad varint)
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// CDC batch sequence is at or below the acknowledged watermark
    #[error("Out of order sequence: last acknowledged {last}, got {got}")]
    OutOfOrder {
        /// Highest sequence durably acknowledged for the shard
        last: u64,
        /// Sequence carried by the rejected batch
        got: u64,
    },

    /// CDC message from a shard that never registered on this channel
    #[error("shard not registered: {0}")]
    NotRegistered(String),

    /// Resource absent (unknown shard, missing blob, missing section)
    #[error("not found: {0}")]
    NotFound(String),

    /// Retryable I/O failure (connection reset, 429/503, timeout)
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable failure (other 4xx, invariant violation downstream)
    #[error("permanent error: {0}")]
    Permanent(String),

    /// I/O error (file operations, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// HTTP status codes the durable writer treats as transient.
const RETRYABLE_STATUS: [u16; 5] = [408, 429, 502, 503, 504];

/// Message fragments that mark an otherwise-untyped failure as transient.
const RETRYABLE_FRAGMENTS: [&str; 8] = [
    "connection reset",
    "connection refused",
    "connection closed",
    "timed out",
    "timeout",
    "temporary failure in name resolution",
    "service unavailable",
    "websocket not connected",
];

impl Error {
    /// Shorthand constructor for [`Error::BadInput`]
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Error::BadInput(msg.into())
    }

    /// Shorthand constructor for [`Error::BadFormat`]
    pub fn bad_format(msg: impl Into<String>) -> Self {
        Error::BadFormat(msg.into())
    }

    /// Shorthand constructor for [`Error::Corrupt`]
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    /// Shorthand constructor for [`Error::Transient`]
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    /// Shorthand constructor for [`Error::Permanent`]
    pub fn permanent(msg: impl Into<String>) -> Self {
        Error::Permanent(msg.into())
    }

    /// Whether the durable writer should retry after this failure.
    ///
    /// Transient network failures and throttling-class HTTP statuses retry;
    /// validation, format, and corruption errors never do. `Io` errors are
    /// classified by kind, then by message fragment.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(msg) => {
                // Already classified, but a status code embedded in the
                // message can still demote it (a wrapped 404 is permanent).
                if let Some(status) = extract_status(msg) {
                    return RETRYABLE_STATUS.contains(&status) || status >= 500;
                }
                true
            }
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ) || message_is_transient(&e.to_string()),
            Error::BadInput(_)
            | Error::BadFormat(_)
            | Error::Corrupt(_)
            | Error::OutOfOrder { .. }
            | Error::NotRegistered(_)
            | Error::NotFound(_)
            | Error::Permanent(_) => false,
        }
    }

    /// Classify a raw failure message from a blob-storage backend.
    ///
    /// Backends report failures as strings (HTTP bodies, socket errors);
    /// this maps them onto [`Error::Transient`] or [`Error::Permanent`].
    pub fn from_store_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if let Some(status) = extract_status(&msg) {
            if RETRYABLE_STATUS.contains(&status) || status >= 500 {
                return Error::Transient(msg);
            }
            if (400..500).contains(&status) {
                return Error::Permanent(msg);
            }
        }
        if message_is_transient(&msg) {
            Error::Transient(msg)
        } else {
            Error::Permanent(msg)
        }
    }

    /// Stable short code for structured error payloads on the write API.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadInput(_) => "bad_input",
            Error::BadFormat(_) => "bad_format",
            Error::Corrupt(_) => "corrupt",
            Error::OutOfOrder { .. } => "out_of_order",
            Error::NotRegistered(_) => "not_registered",
            Error::NotFound(_) => "not_found",
            Error::Transient(_) => "transient",
            Error::Permanent(_) => "permanent",
            Error::Io(_) => "io",
        }
    }
}

fn message_is_transient(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    RETRYABLE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Pull an `HTTP <status>` or bare 3-digit status out of a failure message.
fn extract_status(msg: &str) -> Option<u16> {
    for token in msg.split(|c: char| !c.is_ascii_digit()) {
        if token.len() == 3 {
            if let Ok(status) = token.parse::<u16>() {
                if (100..600).contains(&status) {
                    return Some(status);
                }
            }
        }
    }
    None
}

/// Structured error payload returned by the shard write API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ApiError {
    /// Stable machine-readable code (`bad_input`, `not_found`, ...)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Offending field, when the failure is tied to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    /// Build an API error from a core error, optionally naming the field.
    pub fn from_error(err: &Error, field: Option<&str>) -> Self {
        ApiError {
            code: err.code().to_string(),
            message: err.to_string(),
            field: field.map(|f| f.to_string()),
        }
    }
}
