//! Property tests for the payload codec.
//!
//! Covers the decode/encode identity on stored batches and the shape of
//! derived storage keys across arbitrary instants and access points.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use proptest::prelude::*;
use scanhook_core::{
    annotate, decode, derive_key, encode, Envelope, Location, Observation, ObservationBatch,
};

/// Hundredths keep decimal renderings short enough to reparse exactly.
fn finite() -> impl Strategy<Value = f64> {
    (-100_000_000i64..100_000_000).prop_map(|v| v as f64 / 100.0)
}

fn location() -> impl Strategy<Value = Location> {
    (
        finite(),
        finite(),
        (0i64..50_000).prop_map(|v| v as f64 / 100.0),
        prop::collection::vec(finite(), 0..4),
        prop::collection::vec(finite(), 0..4),
    )
        .prop_map(|(lat, lng, unc, x, y)| Location { lat, lng, unc, x, y })
}

fn observation() -> impl Strategy<Value = Observation> {
    (
        "[a-zA-Z0-9 _-]{0,12}",
        "(([0-9]{1,3}\\.){3}[0-9]{1,3})?",
        "(fe80(:[0-9a-f]{1,4}){1,4})?",
        any::<i64>(),
        "(20[0-9]{2}-[01][0-9]-[0-3][0-9]T[0-2][0-9]:[0-5][0-9]:[0-5][0-9]Z)?",
        any::<i32>(),
        "[A-Za-z]{0,8}",
        "[A-Za-z0-9 .]{0,10}",
        location(),
        "([0-9a-f]{2}:){5}[0-9a-f]{2}",
    )
        .prop_map(|(ssid, ipv4, ipv6, seen_epoch, seen_time, rssi, maker, os, location, mac)| {
            Observation {
                ssid,
                ipv4,
                ipv6,
                seen_epoch,
                seen_time,
                rssi,
                manufacturer: maker,
                os,
                location,
                client_mac: mac,
            }
        })
}

fn batch() -> impl Strategy<Value = ObservationBatch> {
    (
        "([0-9a-f]{2}:){5}[0-9a-f]{2}",
        prop::collection::vec("[a-z]{1,6}", 0..3),
        prop::collection::vec("[A-Z][0-9]", 0..3),
        prop::collection::vec(observation(), 0..5),
    )
        .prop_map(|(ap_mac, ap_tags, ap_floors, observations)| ObservationBatch {
            ap_mac,
            ap_tags,
            ap_floors,
            observations,
            tenant: String::new(),
        })
}

proptest! {
    #[test]
    fn stored_batch_survives_decode(batch in batch(), tenant in "[a-z]{1,8}") {
        let annotated = annotate(batch, &tenant);
        let envelope = Envelope {
            secret: "s".to_string(),
            data: annotated.clone(),
            ..Default::default()
        };
        let wire = serde_json::to_vec(&envelope).unwrap();

        let decoded = decode(&wire).unwrap().into_batch();
        prop_assert_eq!(&decoded, &annotated);

        let stored = encode(&decoded).unwrap();
        let reread: ObservationBatch = serde_json::from_slice(&stored).unwrap();
        prop_assert_eq!(reread, annotated);
    }

    #[test]
    fn keys_embed_ap_mac_and_sort_by_time(
        ap_mac in "([0-9a-f]{2}:){5}[0-9a-f]{2}",
        first in 0i64..4_000_000_000,
        gap in 1i64..1_000_000,
    ) {
        let batch = ObservationBatch { ap_mac: ap_mac.clone(), ..Default::default() };
        let earlier = DateTime::<Utc>::from_timestamp(first, 0).unwrap();
        let later = DateTime::<Utc>::from_timestamp(first + gap, 0).unwrap();

        let a = derive_key(&batch, earlier, &Tz::UTC).unwrap();
        let b = derive_key(&batch, later, &Tz::UTC).unwrap();

        let suffix = format!("-{ap_mac}.json");
        prop_assert!(a.as_str().ends_with(&suffix));
        prop_assert!(a < b);
    }
}
