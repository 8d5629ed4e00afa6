// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use std::time::Duration;

/// Registers descriptions for every leaderboard metric.
/// Call once at startup, after installing the exporter.
pub fn describe_metrics() {
    describe_counter!(
        "leaderboard_transfer_pages_total",
        Unit::Count,
        "Transfer pages fetched from the ledger query interface."
    );
    describe_counter!(
        "leaderboard_transfer_records_total",
        Unit::Count,
        "Transfer records seen by the recipient counter, labeled by outcome (counted, missing_recipient, zero_address, invalid_address)."
    );
    describe_counter!(
        "leaderboard_profile_lookups_total",
        Unit::Count,
        "Profile lookups, labeled by outcome (found, not_found, exhausted, failed)."
    );
    describe_counter!(
        "leaderboard_profile_retries_total",
        Unit::Count,
        "Profile lookup retries caused by rate limiting, timeouts or server errors."
    );
    describe_counter!(
        "cache_hits_total",
        Unit::Count,
        "Leaderboard reads served from the cache."
    );
    describe_counter!(
        "cache_miss_total",
        Unit::Count,
        "Leaderboard reads that found the cache empty or stale."
    );
    describe_counter!(
        "leaderboard_refresh_failures_total",
        Unit::Count,
        "Leaderboard recomputations that failed and left the cache untouched."
    );
    describe_counter!(
        "leaderboard_refresh_joined_total",
        Unit::Count,
        "Stale reads that joined an already running recomputation instead of starting one."
    );
    describe_histogram!(
        "leaderboard_refresh_duration_seconds",
        Unit::Seconds,
        "End-to-end leaderboard recomputation time."
    );
    describe_histogram!(
        "leaderboard_enrichment_duration_seconds",
        Unit::Seconds,
        "Time spent enriching one batch of addresses with profiles."
    );
    describe_gauge!(
        "leaderboard_entries",
        "Number of entries in the most recently published leaderboard."
    );
    describe_gauge!(
        "leaderboard_enriched_entries",
        "Number of entries with profile data in the most recently published leaderboard."
    );
}

// --- Helper functions to update metrics ---

pub fn increment_transfer_pages(count: u64) {
    counter!("leaderboard_transfer_pages_total", count);
}

pub fn increment_transfer_records(outcome: &'static str, count: u64) {
    counter!("leaderboard_transfer_records_total", count, "outcome" => outcome);
}

pub fn increment_profile_lookup(outcome: &'static str) {
    counter!("leaderboard_profile_lookups_total", 1, "outcome" => outcome);
}

pub fn increment_profile_retry(reason: &'static str) {
    counter!("leaderboard_profile_retries_total", 1, "reason" => reason);
}

pub fn increment_cache_hit(cache_name: &str) {
    counter!("cache_hits_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("cache_miss_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_refresh_failures() {
    counter!("leaderboard_refresh_failures_total", 1);
}

pub fn increment_refresh_joined() {
    counter!("leaderboard_refresh_joined_total", 1);
}

pub fn record_refresh_duration(duration: Duration) {
    histogram!("leaderboard_refresh_duration_seconds", duration.as_secs_f64());
}

pub fn record_enrichment_duration(duration: Duration) {
    histogram!("leaderboard_enrichment_duration_seconds", duration.as_secs_f64());
}

pub fn set_leaderboard_size(entries: usize, enriched: usize) {
    gauge!("leaderboard_entries", entries as f64);
    gauge!("leaderboard_enriched_entries", enriched as f64);
}
