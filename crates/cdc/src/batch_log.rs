//! Durable event-batch encoding
//!
//! The blob written by each coordinator flush: a framed sequence of CDC
//! events that decodes back to exactly the batch that was acknowledged.
//!
//! ## Entry Format
//!
//! ```text
//! [version u16 LE][namespace: u16 len + UTF-8][event_count u32 LE]
//! per event: [length u32][type u8][payload: UTF-8 JSON][crc32 u32]
//! ```
//!
//! - **length**: size of type + payload + crc (not including itself)
//! - **type**: 1=insert, 2=update, 3=delete
//! - **payload**: the event in the same JSON shape the wire uses, so log
//!   blobs and channel frames parse identically
//! - **crc32**: over \[type\]\[payload\]

use crate::event::{CdcEvent, SequencedEvent};
use crc32fast::Hasher;
use trellis_core::{Error, Result};

const VERSION: u16 = 1;

const TYPE_INSERT: u8 = 1;
const TYPE_UPDATE: u8 = 2;
const TYPE_DELETE: u8 = 3;

/// Encode one flush batch for a namespace.
pub fn encode_batch(namespace: &str, events: &[SequencedEvent]) -> Result<Vec<u8>> {
    if namespace.len() > u16::MAX as usize {
        return Err(Error::bad_input("namespace exceeds u16 length"));
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(namespace.len() as u16).to_le_bytes());
    buf.extend_from_slice(namespace.as_bytes());
    buf.extend_from_slice(&(events.len() as u32).to_le_bytes());

    for event in events {
        let type_tag = match event.event {
            CdcEvent::Insert { .. } => TYPE_INSERT,
            CdcEvent::Update { .. } => TYPE_UPDATE,
            CdcEvent::Delete { .. } => TYPE_DELETE,
        };
        let payload = serde_json::to_vec(event)
            .map_err(|e| Error::permanent(format!("event serialization failed: {}", e)))?;

        let total_len = 1 + payload.len() + 4;
        buf.extend_from_slice(&(total_len as u32).to_le_bytes());
        buf.push(type_tag);
        buf.extend_from_slice(&payload);

        let mut hasher = Hasher::new();
        hasher.update(&[type_tag]);
        hasher.update(&payload);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    }
    Ok(buf)
}

/// Decode a flush batch, validating every entry checksum.
pub fn decode_batch(bytes: &[u8]) -> Result<(String, Vec<SequencedEvent>)> {
    if bytes.len() < 8 {
        return Err(Error::corrupt("batch log shorter than header"));
    }
    let version = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
    if version != VERSION {
        return Err(Error::bad_format(format!(
            "unsupported batch log version {}",
            version
        )));
    }
    let ns_len = u16::from_le_bytes(bytes[2..4].try_into().unwrap()) as usize;
    if bytes.len() < 4 + ns_len + 4 {
        return Err(Error::corrupt("batch log truncated in namespace"));
    }
    let namespace = std::str::from_utf8(&bytes[4..4 + ns_len])
        .map_err(|_| Error::corrupt("batch log namespace is not UTF-8"))?
        .to_string();
    let mut pos = 4 + ns_len;
    let count = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;

    let mut events = Vec::with_capacity(count);
    for i in 0..count {
        if pos + 4 > bytes.len() {
            return Err(Error::corrupt(format!("batch log truncated at entry {}", i)));
        }
        let total_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if total_len < 5 || pos + total_len > bytes.len() {
            return Err(Error::corrupt(format!(
                "batch log entry {} has bad length {}",
                i, total_len
            )));
        }
        let type_tag = bytes[pos];
        let payload = &bytes[pos + 1..pos + total_len - 4];
        let stored_crc =
            u32::from_le_bytes(bytes[pos + total_len - 4..pos + total_len].try_into().unwrap());

        let mut hasher = Hasher::new();
        hasher.update(&[type_tag]);
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(Error::corrupt(format!(
                "batch log entry {} checksum mismatch",
                i
            )));
        }

        let event: SequencedEvent = serde_json::from_slice(payload)
            .map_err(|e| Error::corrupt(format!("batch log entry {} unparseable: {}", i, e)))?;

        let expected = match event.event {
            CdcEvent::Insert { .. } => TYPE_INSERT,
            CdcEvent::Update { .. } => TYPE_UPDATE,
            CdcEvent::Delete { .. } => TYPE_DELETE,
        };
        if type_tag != expected {
            return Err(Error::corrupt(format!(
                "batch log entry {} type tag {} does not match payload",
                i, type_tag
            )));
        }

        events.push(event);
        pos += total_len;
    }
    if pos != bytes.len() {
        return Err(Error::corrupt("trailing bytes after batch log entries"));
    }
    Ok((namespace, events))
}
