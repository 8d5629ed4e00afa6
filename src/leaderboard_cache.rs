// src/leaderboard_cache.rs
//
// Single-slot cache for the most recently computed leaderboard.
// The slot holds an immutable snapshot that is swapped atomically on publish,
// so readers always see a matching timestamp/entries pair.

use crate::leaderboard::LeaderboardEntry;
use crate::metrics;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wall clock used for freshness decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock, for tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = chrono::Duration::from_std(by)
            .ok()
            .and_then(|by| now.checked_add_signed(by))
        {
            *now = next;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One computed leaderboard. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub computed_at: DateTime<Utc>,
    pub entries: Arc<Vec<LeaderboardEntry>>,
}

impl CacheRecord {
    pub fn new(computed_at: DateTime<Utc>, entries: Vec<LeaderboardEntry>) -> Self {
        Self {
            computed_at,
            entries: Arc::new(entries),
        }
    }
}

/// Result of consulting the cache.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Nothing has been computed yet.
    Empty,
    Fresh(Arc<CacheRecord>),
    /// Older than the TTL; still the last known-good value.
    Stale(Arc<CacheRecord>),
}

impl CacheLookup {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }
}

pub struct LeaderboardCache {
    slot: ArcSwapOption<CacheRecord>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl LeaderboardCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::max_value()),
            clock,
        }
    }

    /// Current snapshot classified against the TTL.
    ///
    /// Fresh iff `now - computed_at < ttl`; a record exactly `ttl` old is stale.
    pub fn lookup(&self) -> CacheLookup {
        let Some(record) = self.slot.load_full() else {
            metrics::increment_cache_miss("leaderboard");
            return CacheLookup::Empty;
        };

        let age = self.clock.now().signed_duration_since(record.computed_at);
        if age < self.ttl {
            metrics::increment_cache_hit("leaderboard");
            CacheLookup::Fresh(record)
        } else {
            debug!(
                "LeaderboardCache: snapshot from {} is stale (age {}s)",
                record.computed_at,
                age.num_seconds()
            );
            metrics::increment_cache_miss("leaderboard");
            CacheLookup::Stale(record)
        }
    }

    /// Last published record regardless of age.
    pub fn snapshot(&self) -> Option<Arc<CacheRecord>> {
        self.slot.load_full()
    }

    /// Replace the slot with `record`.
    pub fn publish(&self, record: CacheRecord) -> Arc<CacheRecord> {
        let record = Arc::new(record);
        self.slot.store(Some(Arc::clone(&record)));
        debug!(
            "LeaderboardCache: published {} entries computed at {}",
            record.entries.len(),
            record.computed_at
        );
        record
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(address: &str, count: u64) -> LeaderboardEntry {
        LeaderboardEntry::unenriched(address.to_string(), count)
    }

    fn setup(ttl_secs: u64) -> (Arc<ManualClock>, LeaderboardCache) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let cache = LeaderboardCache::new(Duration::from_secs(ttl_secs), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_empty_until_published() {
        let (_clock, cache) = setup(60);
        assert!(matches!(cache.lookup(), CacheLookup::Empty));
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn test_fresh_then_stale_at_ttl() {
        let (clock, cache) = setup(60);
        let published = cache.publish(CacheRecord::new(clock.now(), vec![entry("0xa", 2)]));

        clock.advance(Duration::from_secs(59));
        match cache.lookup() {
            CacheLookup::Fresh(record) => assert!(Arc::ptr_eq(&record, &published)),
            other => panic!("expected fresh, got {:?}", other),
        }

        clock.advance(Duration::from_secs(1));
        match cache.lookup() {
            CacheLookup::Stale(record) => assert_eq!(record.entries[0].transfer_count, 2),
            other => panic!("expected stale, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_replaces_whole_record() {
        let (clock, cache) = setup(60);
        let first = cache.publish(CacheRecord::new(clock.now(), vec![entry("0xa", 1)]));
        clock.advance(Duration::from_secs(120));
        cache.publish(CacheRecord::new(clock.now(), vec![entry("0xb", 5), entry("0xa", 1)]));

        let current = cache.snapshot().unwrap();
        assert_eq!(current.computed_at, clock.now());
        assert_eq!(current.entries.len(), 2);
        // readers holding the old snapshot keep seeing it unchanged
        assert_eq!(first.entries.len(), 1);
        assert!(cache.lookup().is_fresh());
    }
}
