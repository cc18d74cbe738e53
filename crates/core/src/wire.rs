//! Serde helpers for 64-bit values on the JSON wire
//!
//! JSON parsers on edge runtimes cannot hold 64-bit integers losslessly, so
//! sequences, timestamps, and INT64 object values travel as decimal strings.
//! Binary frames carry the same JSON and parse identically.

/// `#[serde(with = "wire_u64")]` — u64 as a decimal string.
pub mod wire_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialize a u64 as its decimal string form.
    pub fn serialize<S: Serializer>(v: &u64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&v.to_string())
    }

    /// Accept either a decimal string or (for tolerance) a bare number.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }
        match Raw::deserialize(de)? {
            Raw::Str(s) => s.parse::<u64>().map_err(de::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}

/// `#[serde(with = "wire_i64")]` — i64 as a decimal string.
pub mod wire_i64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialize an i64 as its decimal string form.
    pub fn serialize<S: Serializer>(v: &i64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&v.to_string())
    }

    /// Accept either a decimal string or (for tolerance) a bare number.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(i64),
        }
        match Raw::deserialize(de)? {
            Raw::Str(s) => s.parse::<i64>().map_err(de::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        #[serde(with = "super::wire_u64")]
        seq: u64,
        #[serde(with = "super::wire_i64")]
        delta: i64,
    }

    #[test]
    fn test_u64_max_survives_json() {
        let p = Probe {
            seq: u64::MAX,
            delta: i64::MIN,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"18446744073709551615\""));
        assert!(json.contains("\"-9223372036854775808\""));
        let back: Probe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_accepts_bare_numbers() {
        let back: Probe = serde_json::from_str(r#"{"seq": 42, "delta": -7}"#).unwrap();
        assert_eq!(back.seq, 42);
        assert_eq!(back.delta, -7);
    }

    #[test]
    fn test_rejects_garbage_strings() {
        assert!(serde_json::from_str::<Probe>(r#"{"seq": "x", "delta": "0"}"#).is_err());
    }
}
