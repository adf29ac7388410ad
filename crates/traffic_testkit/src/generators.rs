//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random records and whole logs
//! that keep the ordering the replay engine relies on.

use proptest::prelude::*;
use traffic_codec::{Headers, LogRecord, Protocol};

/// Strategy for generating HTTP methods.
pub fn method_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"])
        .prop_map(str::to_string)
}

/// Strategy for generating request targets with optional query strings.
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("/[a-z0-9_/-]{0,30}(\\?[a-z]{1,8}=[a-z0-9%]{0,12})?")
        .expect("Invalid regex")
}

/// Strategy for generating header sets with unique lowercase names.
pub fn headers_strategy() -> impl Strategy<Value = Headers> {
    prop::collection::btree_map("[a-z][a-z0-9-]{0,15}", "[ -~]{0,40}", 0..8)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for generating bodies, including non-UTF-8 bytes and newlines.
pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        2 => Just(Vec::new()),
        1 => prop::collection::vec(any::<u8>(), 1..256),
        1 => "[ -~\n]{1,128}".prop_map(String::into_bytes),
    ]
}

/// Strategy for generating a single record with consistent `content_length`.
pub fn record_strategy() -> impl Strategy<Value = LogRecord> {
    (
        method_strategy(),
        path_strategy(),
        prop::bool::ANY,
        headers_strategy(),
        1_400_000_000_000u64..1_800_000_000_000,
        0u64..600_000,
        body_strategy(),
    )
        .prop_map(|(method, path, https, headers, timestamp, time_delta, body)| {
            let protocol = if https { Protocol::Https } else { Protocol::Http };
            let mut record = LogRecord::new(method, path, protocol)
                .with_timing(timestamp, time_delta)
                .with_body(body);
            record.headers = headers;
            record
        })
}

/// Strategy for generating a log of `1..max_len` records ordered by
/// non-decreasing `time_delta`.
pub fn ordered_log_strategy(max_len: usize) -> impl Strategy<Value = Vec<LogRecord>> {
    prop::collection::vec((record_strategy(), 0u64..50), 1..max_len.max(2)).prop_map(|items| {
        let mut time_delta = 0;
        items
            .into_iter()
            .map(|(mut record, gap)| {
                time_delta += gap;
                record.timestamp = 1_456_826_400_000 + time_delta;
                record.time_delta = time_delta;
                record
            })
            .collect()
    })
}
