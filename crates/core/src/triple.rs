//! The triple data model
//!
//! A triple is (subject, predicate, object, timestamp, tx_id). Subjects are
//! validated http(s) URLs; objects are a tagged union over a closed set of
//! value types with stable numeric codes. Deletes are tombstones: the object
//! is replaced by [`ObjectValue::Null`] and the original row is retained for
//! MVCC history.
//!
//! Within one shard a triple is uniquely identified by
//! (subject, predicate, object value, timestamp).

use crate::entity::{validate_entity_id, validate_predicate};
use crate::error::{Error, Result};
use crate::txid::TxId;
use serde::{Deserialize, Serialize};

/// Stable numeric codes for object value types.
///
/// These codes appear on disk (GraphCol type column) and on the CDC wire.
/// They are frozen; new types append, existing codes never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectType {
    /// Tombstone marker for logical deletes
    Null = 0,
    /// UTF-8 string
    String = 1,
    /// 32-bit signed integer
    Int32 = 2,
    /// 64-bit signed integer
    Int64 = 3,
    /// IEEE 754 double
    Float64 = 4,
    /// Boolean
    Bool = 5,
    /// Nanoseconds since epoch, unsigned
    Timestamp = 6,
    /// (latitude, longitude) doubles
    GeoPoint = 7,
    /// Opaque bytes
    Binary = 8,
    /// Reference to another subject URL
    Ref = 10,
}

impl ObjectType {
    /// Decode a stored type code.
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => ObjectType::Null,
            1 => ObjectType::String,
            2 => ObjectType::Int32,
            3 => ObjectType::Int64,
            4 => ObjectType::Float64,
            5 => ObjectType::Bool,
            6 => ObjectType::Timestamp,
            7 => ObjectType::GeoPoint,
            8 => ObjectType::Binary,
            10 => ObjectType::Ref,
            other => return Err(Error::corrupt(format!("unknown object type code {}", other))),
        })
    }

    /// The stored type code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// An object value: the tagged union side of a triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ObjectValue {
    /// Tombstone (logical delete)
    Null,
    /// UTF-8 string
    String(String),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer; serialized as a decimal string on the wire
    Int64(#[serde(with = "crate::wire_i64")] i64),
    /// IEEE 754 double
    Float64(f64),
    /// Boolean
    Bool(bool),
    /// Nanoseconds since epoch; serialized as a decimal string on the wire
    Timestamp(#[serde(with = "crate::wire_u64")] u64),
    /// Latitude / longitude pair
    GeoPoint {
        /// Degrees, [-90, 90]
        lat: f64,
        /// Degrees, [-180, 180]
        lng: f64,
    },
    /// Opaque bytes
    Binary(Vec<u8>),
    /// Reference to another subject URL
    Ref(String),
}

impl ObjectValue {
    /// The type tag for this value.
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectValue::Null => ObjectType::Null,
            ObjectValue::String(_) => ObjectType::String,
            ObjectValue::Int32(_) => ObjectType::Int32,
            ObjectValue::Int64(_) => ObjectType::Int64,
            ObjectValue::Float64(_) => ObjectType::Float64,
            ObjectValue::Bool(_) => ObjectType::Bool,
            ObjectValue::Timestamp(_) => ObjectType::Timestamp,
            ObjectValue::GeoPoint { .. } => ObjectType::GeoPoint,
            ObjectValue::Binary(_) => ObjectType::Binary,
            ObjectValue::Ref(_) => ObjectType::Ref,
        }
    }

    /// True for the tombstone marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, ObjectValue::Null)
    }

    /// Validate invariants that depend on the value itself.
    ///
    /// A REF target must pass the same validation as a subject; a geo point
    /// must be inside the WGS84 envelope.
    pub fn validate(&self) -> Result<()> {
        match self {
            ObjectValue::Ref(target) => validate_entity_id(target),
            ObjectValue::GeoPoint { lat, lng } => {
                if !(-90.0..=90.0).contains(lat) {
                    return Err(Error::bad_input(format!("latitude {} out of range", lat)));
                }
                if !(-180.0..=180.0).contains(lng) {
                    return Err(Error::bad_input(format!("longitude {} out of range", lng)));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A single triple row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Validated http(s) URL identifying the entity
    pub subject: String,
    /// Identifier (letters, digits, underscore)
    pub predicate: String,
    /// Tagged object value
    pub object: ObjectValue,
    /// Nanoseconds since epoch; serialized as a decimal string on the wire
    #[serde(with = "crate::wire_u64")]
    pub timestamp: u64,
    /// 26-character ULID, monotonic within the producing shard
    pub tx_id: TxId,
}

impl Triple {
    /// Build a triple, validating subject, predicate, and object.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: ObjectValue,
        timestamp: u64,
        tx_id: TxId,
    ) -> Result<Self> {
        let subject = subject.into();
        let predicate = predicate.into();
        validate_entity_id(&subject)?;
        validate_predicate(&predicate)?;
        object.validate()?;
        Ok(Triple {
            subject,
            predicate,
            object,
            timestamp,
            tx_id,
        })
    }

    /// A tombstone row for this triple (object replaced by NULL).
    pub fn tombstone(&self, timestamp: u64, tx_id: TxId) -> Triple {
        Triple {
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
            object: ObjectValue::Null,
            timestamp,
            tx_id,
        }
    }

    /// True when this row is a logical delete.
    pub fn is_tombstone(&self) -> bool {
        self.object.is_tombstone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> TxId {
        TxId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap()
    }

    #[test]
    fn test_object_type_codes_are_stable() {
        assert_eq!(ObjectType::Null.code(), 0);
        assert_eq!(ObjectType::String.code(), 1);
        assert_eq!(ObjectType::Int32.code(), 2);
        assert_eq!(ObjectType::Int64.code(), 3);
        assert_eq!(ObjectType::Float64.code(), 4);
        assert_eq!(ObjectType::Bool.code(), 5);
        assert_eq!(ObjectType::Timestamp.code(), 6);
        assert_eq!(ObjectType::GeoPoint.code(), 7);
        assert_eq!(ObjectType::Binary.code(), 8);
        assert_eq!(ObjectType::Ref.code(), 10);
    }

    #[test]
    fn test_object_type_round_trip() {
        for t in [
            ObjectType::Null,
            ObjectType::String,
            ObjectType::Int32,
            ObjectType::Int64,
            ObjectType::Float64,
            ObjectType::Bool,
            ObjectType::Timestamp,
            ObjectType::GeoPoint,
            ObjectType::Binary,
            ObjectType::Ref,
        ] {
            assert_eq!(ObjectType::from_code(t.code()).unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_type_code_is_corrupt() {
        assert!(matches!(ObjectType::from_code(9), Err(Error::Corrupt(_))));
        assert!(matches!(ObjectType::from_code(200), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_triple_new_validates_subject() {
        let err = Triple::new(
            "ftp://example.com/a",
            "name",
            ObjectValue::String("x".into()),
            1,
            tx(),
        );
        assert!(matches!(err, Err(Error::BadInput(_))));
    }

    #[test]
    fn test_triple_new_validates_predicate() {
        let err = Triple::new(
            "http://example.com/a",
            "has:colon",
            ObjectValue::String("x".into()),
            1,
            tx(),
        );
        assert!(matches!(err, Err(Error::BadInput(_))));
    }

    #[test]
    fn test_ref_target_must_validate() {
        let err = Triple::new(
            "http://example.com/a",
            "knows",
            ObjectValue::Ref("not a url".into()),
            1,
            tx(),
        );
        assert!(matches!(err, Err(Error::BadInput(_))));

        let ok = Triple::new(
            "http://example.com/a",
            "knows",
            ObjectValue::Ref("https://example.com/b".into()),
            1,
            tx(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_geo_point_range() {
        assert!(ObjectValue::GeoPoint { lat: 91.0, lng: 0.0 }.validate().is_err());
        assert!(ObjectValue::GeoPoint { lat: 0.0, lng: -181.0 }.validate().is_err());
        assert!(ObjectValue::GeoPoint { lat: 52.5, lng: 13.4 }.validate().is_ok());
    }

    #[test]
    fn test_tombstone_retains_identity() {
        let t = Triple::new(
            "http://example.com/a",
            "name",
            ObjectValue::String("alice".into()),
            100,
            tx(),
        )
        .unwrap();
        let tomb = t.tombstone(200, tx());
        assert!(tomb.is_tombstone());
        assert_eq!(tomb.subject, t.subject);
        assert_eq!(tomb.predicate, t.predicate);
        assert_eq!(tomb.timestamp, 200);
    }

    #[test]
    fn test_wire_json_encodes_u64_as_string() {
        let t = Triple::new(
            "http://example.com/a",
            "age",
            ObjectValue::Int64(i64::MAX),
            u64::MAX,
            tx(),
        )
        .unwrap();
        let json = serde_json::to_value(&t).unwrap();
        // 64-bit values must survive JSON parsers without integer precision,
        // so they travel as decimal strings.
        assert_eq!(json["timestamp"], serde_json::json!("18446744073709551615"));
        assert_eq!(json["object"]["value"], serde_json::json!("9223372036854775807"));
        let back: Triple = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
