//! CDC wire protocol
//!
//! Frames are UTF-8 JSON; 64-bit values travel as decimal strings so they
//! survive JSON parsers without 64-bit integers. Binary framings are
//! permitted by the protocol but must parse to the same JSON.

use crate::event::SequencedEvent;
use serde::{Deserialize, Serialize};
use trellis_core::{Error, Result};

/// A protocol frame on the shard ↔ coordinator channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Shard declares its resume point
    Register {
        /// Producing shard
        shard_id: String,
        /// Namespace the shard belongs to
        namespace: String,
        /// Highest sequence the shard knows to be durable
        #[serde(with = "trellis_core::wire_u64")]
        last_sequence: u64,
    },
    /// Coordinator confirms a registration, echoing the declared watermark
    Registered {
        /// Registered shard
        shard_id: String,
        /// The watermark now in effect
        #[serde(with = "trellis_core::wire_u64")]
        last_sequence: u64,
    },
    /// A batch of events up to and including `sequence`
    Cdc {
        /// Producing shard
        shard_id: String,
        /// Events in sequence order
        events: Vec<SequencedEvent>,
        /// Sequence of the last event in the batch
        #[serde(with = "trellis_core::wire_u64")]
        sequence: u64,
    },
    /// Coordinator confirms a durable write up to `sequence`
    Ack {
        /// Shard being acknowledged
        shard_id: String,
        /// New high watermark
        #[serde(with = "trellis_core::wire_u64")]
        sequence: u64,
        /// Events covered by this acknowledgement
        events_acked: usize,
    },
    /// Explicit unregister
    Deregister {
        /// Shard leaving the channel
        shard_id: String,
    },
    /// Protocol or validation failure
    Error {
        /// Human-readable description
        message: String,
    },
}

impl WireMessage {
    /// Serialize to a JSON frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::permanent(format!("frame serialization failed: {}", e)))
    }

    /// Parse a JSON frame.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::bad_format(format!("unparseable frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CdcEvent;
    use trellis_core::{ObjectValue, Triple, TxId};

    fn event(sequence: u64) -> SequencedEvent {
        SequencedEvent {
            sequence,
            event: CdcEvent::Insert {
                triple: Triple::new(
                    "http://x/a",
                    "value",
                    ObjectValue::Int64(i64::MAX),
                    u64::MAX,
                    TxId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap(),
                )
                .unwrap(),
            },
        }
    }

    #[test]
    fn test_register_frame_shape() {
        let msg = WireMessage::Register {
            shard_id: "shard-A".into(),
            namespace: "test".into(),
            last_sequence: 100,
        };
        let raw = msg.encode().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["last_sequence"], "100");
        assert_eq!(WireMessage::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_cdc_frame_round_trip_with_bigints() {
        let msg = WireMessage::Cdc {
            shard_id: "shard-A".into(),
            events: vec![event(1), event(2)],
            sequence: 2,
        };
        let raw = msg.encode().unwrap();
        // No bare 64-bit integers anywhere in the frame
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["sequence"], "2");
        assert_eq!(json["events"][0]["sequence"], "1");
        assert_eq!(
            json["events"][0]["triple"]["timestamp"],
            "18446744073709551615"
        );
        assert_eq!(WireMessage::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_all_frames_round_trip() {
        let frames = vec![
            WireMessage::Registered {
                shard_id: "s".into(),
                last_sequence: 7,
            },
            WireMessage::Ack {
                shard_id: "s".into(),
                sequence: 9,
                events_acked: 3,
            },
            WireMessage::Deregister {
                shard_id: "s".into(),
            },
            WireMessage::Error {
                message: "Out of order sequence".into(),
            },
        ];
        for msg in frames {
            let raw = msg.encode().unwrap();
            assert_eq!(WireMessage::decode(&raw).unwrap(), msg);
        }
    }

    #[test]
    fn test_garbage_frame_is_bad_format() {
        assert!(matches!(
            WireMessage::decode("not json"),
            Err(Error::BadFormat(_))
        ));
        assert!(matches!(
            WireMessage::decode(r#"{"type":"warp"}"#),
            Err(Error::BadFormat(_))
        ));
    }
}
