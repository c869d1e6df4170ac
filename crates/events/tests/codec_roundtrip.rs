//! Property tests: decode is the strict inverse of encode for every field
//! mapper, and the wire record survives a JSON round-trip.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use chronicle_core::{AggregateId, EventId, UserId};
use chronicle_events::codec::{
    encode_bytes, encode_f64, encode_string, encode_u64_decimal, FieldMap,
};
use chronicle_events::{EventMetadata, EventRecord};

proptest! {
    #[test]
    fn string_codec_round_trips(value in ".*") {
        let encoded = serde_json::json!({ "field": encode_string(&value) });
        let fields = FieldMap::from_value(&encoded).unwrap();
        prop_assert_eq!(fields.string("field").unwrap(), value);
    }

    #[test]
    fn bytes_codec_round_trips(value in proptest::collection::vec(any::<u8>(), 0..512)) {
        let encoded = serde_json::json!({ "field": encode_bytes(&value) });
        let fields = FieldMap::from_value(&encoded).unwrap();
        prop_assert_eq!(fields.bytes("field").unwrap(), value);
    }

    #[test]
    fn u64_decimal_codec_round_trips(value in any::<u64>()) {
        let encoded = serde_json::json!({ "field": encode_u64_decimal(value) });
        let fields = FieldMap::from_value(&encoded).unwrap();
        prop_assert_eq!(fields.u64_decimal("field").unwrap(), value);
    }

    #[test]
    fn finite_number_codec_round_trips(value in proptest::num::f64::NORMAL) {
        let encoded = serde_json::json!({ "field": encode_f64(value) });
        let fields = FieldMap::from_value(&encoded).unwrap();
        prop_assert_eq!(fields.finite_f64("field").unwrap(), value);
    }

    #[test]
    fn event_record_round_trips(
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        version in 1u64..10_000,
        occurred_at in 0i64..4_102_444_800_000,
        epoch in proptest::option::of(any::<u64>()),
    ) {
        let metadata = EventMetadata::new(
            EventId::new(),
            AggregateId::new(),
            "scope",
            "keyring.scope.created",
            version,
            Utc.timestamp_millis_opt(occurred_at).unwrap(),
            Some(UserId::new()),
            None,
            None,
        );

        let mut record = EventRecord::new(&metadata, &payload);
        if let Some(epoch) = epoch {
            record = record.with_epoch(epoch);
        }

        let back = EventRecord::decode_json(&record.encode_json()).unwrap();
        prop_assert_eq!(&back, &record);
        prop_assert_eq!(back.payload_bytes().unwrap(), payload);
    }
}
