//! Bijective mappers between payload field types and JSON primitives.
//!
//! Each event spec maps payload field names to an (encode, decode) pair built
//! from these helpers. Decode is the strict inverse of encode: a missing
//! field, a wrong JSON shape, or a non-finite number is rejected with the
//! offending field name. Octet sequences travel as base64url without padding;
//! 64-bit counters travel as decimal strings so they survive JSON intact.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use chronicle_core::ErrorCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("field '{field}' is missing")]
    MissingField { field: String },

    #[error("field '{field}': expected {expected}")]
    WrongShape {
        field: String,
        expected: &'static str,
    },

    #[error("field '{field}': number is not finite")]
    NonFiniteNumber { field: String },

    #[error("field '{field}': {detail}")]
    InvalidValue { field: String, detail: String },
}

impl CodecError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Validation
    }

    fn wrong_shape(field: &str, expected: &'static str) -> Self {
        CodecError::WrongShape {
            field: field.to_string(),
            expected,
        }
    }

    fn invalid(field: &str, detail: impl Into<String>) -> Self {
        CodecError::InvalidValue {
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

pub fn encode_string(value: &str) -> JsonValue {
    JsonValue::String(value.to_string())
}

pub fn encode_f64(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

pub fn encode_bytes(value: &[u8]) -> JsonValue {
    JsonValue::String(URL_SAFE_NO_PAD.encode(value))
}

pub fn encode_u64_decimal(value: u64) -> JsonValue {
    JsonValue::String(value.to_string())
}

pub fn encode_nullable<T>(value: Option<&T>, encode: impl Fn(&T) -> JsonValue) -> JsonValue {
    match value {
        Some(inner) => encode(inner),
        None => JsonValue::Null,
    }
}

pub fn encode_timestamp(value: chrono::DateTime<chrono::Utc>) -> JsonValue {
    JsonValue::Number(value.timestamp_millis().into())
}

// ---------------------------------------------------------------------------
// Decoders — strict inverses over a JSON object
// ---------------------------------------------------------------------------

/// Read-side view over an encoded payload object.
pub struct FieldMap<'a> {
    fields: &'a Map<String, JsonValue>,
}

impl<'a> FieldMap<'a> {
    /// The payload of every event spec is a JSON object; anything else is a
    /// shape violation at the outermost level.
    pub fn from_value(value: &'a JsonValue) -> Result<Self, CodecError> {
        match value {
            JsonValue::Object(fields) => Ok(Self { fields }),
            _ => Err(CodecError::wrong_shape("<payload>", "object")),
        }
    }

    fn get(&self, field: &str) -> Result<&'a JsonValue, CodecError> {
        self.fields.get(field).ok_or_else(|| CodecError::MissingField {
            field: field.to_string(),
        })
    }

    pub fn string(&self, field: &str) -> Result<String, CodecError> {
        match self.get(field)? {
            JsonValue::String(s) => Ok(s.clone()),
            _ => Err(CodecError::wrong_shape(field, "string")),
        }
    }

    pub fn finite_f64(&self, field: &str) -> Result<f64, CodecError> {
        match self.get(field)? {
            JsonValue::Number(n) => {
                let value = n.as_f64().ok_or_else(|| CodecError::NonFiniteNumber {
                    field: field.to_string(),
                })?;
                if !value.is_finite() {
                    return Err(CodecError::NonFiniteNumber {
                        field: field.to_string(),
                    });
                }
                Ok(value)
            }
            _ => Err(CodecError::wrong_shape(field, "finite number")),
        }
    }

    pub fn bytes(&self, field: &str) -> Result<Vec<u8>, CodecError> {
        match self.get(field)? {
            JsonValue::String(s) => URL_SAFE_NO_PAD
                .decode(s)
                .map_err(|e| CodecError::invalid(field, format!("base64url: {e}"))),
            _ => Err(CodecError::wrong_shape(field, "base64url string")),
        }
    }

    pub fn u64_decimal(&self, field: &str) -> Result<u64, CodecError> {
        match self.get(field)? {
            JsonValue::String(s) => s
                .parse::<u64>()
                .map_err(|e| CodecError::invalid(field, format!("decimal u64: {e}"))),
            _ => Err(CodecError::wrong_shape(field, "decimal string")),
        }
    }

    /// Epoch-milliseconds timestamp; must be a non-negative integer.
    pub fn timestamp(&self, field: &str) -> Result<chrono::DateTime<chrono::Utc>, CodecError> {
        use chrono::TimeZone;

        let millis = match self.get(field)? {
            JsonValue::Number(n) => n.as_i64().ok_or_else(|| {
                CodecError::wrong_shape(field, "integer epoch milliseconds")
            })?,
            _ => return Err(CodecError::wrong_shape(field, "integer epoch milliseconds")),
        };
        if millis < 0 {
            return Err(CodecError::invalid(field, "timestamp must be >= 0"));
        }
        chrono::Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| CodecError::invalid(field, "timestamp out of range"))
    }

    /// Nullable variant: the field must be present; `null` maps to `None`.
    pub fn nullable<T>(
        &self,
        field: &str,
        decode: impl Fn(&Self, &str) -> Result<T, CodecError>,
    ) -> Result<Option<T>, CodecError> {
        match self.get(field)? {
            JsonValue::Null => Ok(None),
            _ => decode(self, field).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: &JsonValue) -> FieldMap<'_> {
        FieldMap::from_value(value).unwrap()
    }

    #[test]
    fn string_round_trip() {
        let encoded = json!({ "name": encode_string("alpha") });
        assert_eq!(map(&encoded).string("name").unwrap(), "alpha");
    }

    #[test]
    fn missing_field_is_rejected() {
        let encoded = json!({});
        let err = map(&encoded).string("name").unwrap_err();
        assert!(matches!(err, CodecError::MissingField { .. }));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let encoded = json!({ "name": 7 });
        let err = map(&encoded).string("name").unwrap_err();
        assert!(matches!(err, CodecError::WrongShape { .. }));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(FieldMap::from_value(&json!("scalar")).is_err());
        assert!(FieldMap::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn bytes_round_trip_without_padding() {
        let raw = vec![0u8, 1, 2, 250, 251, 252];
        let encoded = json!({ "key": encode_bytes(&raw) });
        // base64url alphabet, no '=' padding on the wire.
        assert!(!encoded["key"].as_str().unwrap().contains('='));
        assert_eq!(map(&encoded).bytes("key").unwrap(), raw);
    }

    #[test]
    fn bytes_rejects_standard_alphabet_input() {
        let encoded = json!({ "key": "a+b/" });
        assert!(map(&encoded).bytes("key").is_err());
    }

    #[test]
    fn u64_decimal_survives_beyond_f64_precision() {
        let big = u64::MAX - 1;
        let encoded = json!({ "epoch": encode_u64_decimal(big) });
        assert_eq!(map(&encoded).u64_decimal("epoch").unwrap(), big);
    }

    #[test]
    fn u64_decimal_rejects_negative_and_junk() {
        for bad in ["-1", "1.5", "epoch", ""] {
            let encoded = json!({ "epoch": bad });
            assert!(map(&encoded).u64_decimal("epoch").is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn nullable_maps_null_to_none_but_requires_presence() {
        let encoded = json!({ "reason": null });
        let fields = map(&encoded);
        assert_eq!(fields.nullable("reason", FieldMap::string).unwrap(), None);
        assert!(fields.nullable("missing", FieldMap::string).is_err());

        let encoded = json!({ "reason": "rotated" });
        assert_eq!(
            map(&encoded).nullable("reason", FieldMap::string).unwrap(),
            Some("rotated".to_string())
        );
    }

    #[test]
    fn finite_number_round_trip_rejects_nothing_finite() {
        let encoded = json!({ "weight": encode_f64(2.5) });
        assert_eq!(map(&encoded).finite_f64("weight").unwrap(), 2.5);
    }
}
