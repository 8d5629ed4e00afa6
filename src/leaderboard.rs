//! # Leaderboard Assembler
//!
//! Ties the pipeline together and serves the leaderboard read.
//!
//! ## Flow
//!
//! 1. Fresh cache → return it as-is (no network)
//! 2. Otherwise count recipients over every transfer page
//! 3. Rank by count (stable on ties)
//! 4. Enrich the first `enrichment_batch_size` addresses with profiles
//! 5. Merge profiles by address, publish to the cache, return
//!
//! ## Concurrency
//!
//! Callers that find the cache stale at the same time share one recomputation.
//! The recomputation runs on its own task, so it finishes (and publishes) even
//! if every caller waiting on it goes away. A failed recomputation leaves the
//! cache untouched. A stale reader that reaches the slot after a recomputation
//! has already published is served that record instead of starting another.

use crate::leaderboard_cache::{CacheLookup, CacheRecord, Clock, LeaderboardCache};
use crate::metrics;
use crate::profile_enricher::{Profile, ProfileEnricher, ProfileLookup, RetryPolicy};
use crate::recipient_counter::count_recipients;
use crate::transfer_fetcher::{FetchError, TransferSource};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::warn;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One ranked wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub wallet_address: String,
    pub transfer_count: u64,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub profile_url: Option<String>,
}

impl LeaderboardEntry {
    pub fn unenriched(wallet_address: String, transfer_count: u64) -> Self {
        Self {
            wallet_address,
            transfer_count,
            username: None,
            avatar: None,
            profile_url: None,
        }
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        Self {
            username: profile.username,
            avatar: profile.avatar,
            profile_url: Some(profile.profile_url),
            ..self
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.profile_url.is_some()
    }
}

/// Payload of a leaderboard read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub served_from_cache: bool,
    pub computed_at: DateTime<Utc>,
    pub entries: Arc<Vec<LeaderboardEntry>>,
}

impl LeaderboardResponse {
    fn from_record(record: &CacheRecord, served_from_cache: bool) -> Self {
        Self {
            served_from_cache,
            computed_at: record.computed_at,
            entries: Arc::clone(&record.entries),
        }
    }
}

/// Everything the assembler needs to know, passed in at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardConfig {
    /// Checksummed collectible contract address.
    pub contract_address: String,
    /// Checksummed mint/source address.
    pub source_address: String,
    pub cache_ttl: Duration,
    /// How many top addresses get profile lookups.
    pub enrichment_batch_size: usize,
    pub retry: RetryPolicy,
    pub profile_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaderboardError {
    #[error("Failed to fetch transfers: {0}")]
    FetchFailed(#[from] FetchError),
    #[error("Leaderboard refresh aborted: {0}")]
    Aborted(String),
}

type RefreshResult = Result<Arc<CacheRecord>, LeaderboardError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;
/// A record and whether it was served from the cache.
type Served = (Arc<CacheRecord>, bool);

struct Pipeline {
    config: LeaderboardConfig,
    source: Arc<dyn TransferSource>,
    enricher: ProfileEnricher,
    cache: LeaderboardCache,
}

impl Pipeline {
    async fn run(&self) -> RefreshResult {
        let start = Instant::now();
        tracing::info!(
            contract = %self.config.contract_address,
            source = %self.config.source_address,
            "Recomputing leaderboard"
        );

        let (counts, _summary) = count_recipients(
            self.source.as_ref(),
            &self.config.contract_address,
            &self.config.source_address,
        )
        .await?;

        let ranked = counts.into_ranked();
        let batch: Vec<String> = ranked
            .iter()
            .take(self.config.enrichment_batch_size)
            .map(|r| r.address.clone())
            .collect();
        let mut profiles = self.enricher.enrich(&batch).await;

        let entries: Vec<LeaderboardEntry> = ranked
            .into_iter()
            .map(|r| {
                let entry = LeaderboardEntry::unenriched(r.address, r.count);
                match profiles.remove(&entry.wallet_address) {
                    Some(profile) => entry.with_profile(profile),
                    None => entry,
                }
            })
            .collect();

        let enriched = entries.iter().filter(|e| e.is_enriched()).count();
        let total = entries.len();
        let record = self
            .cache
            .publish(CacheRecord::new(self.cache.now(), entries));

        let elapsed = start.elapsed();
        metrics::record_refresh_duration(elapsed);
        metrics::set_leaderboard_size(total, enriched);
        tracing::info!(
            entries = total,
            enriched,
            elapsed_ms = elapsed.as_millis() as u64,
            "Leaderboard published"
        );
        Ok(record)
    }
}

pub struct LeaderboardAssembler {
    pipeline: Arc<Pipeline>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl LeaderboardAssembler {
    pub fn new(
        config: LeaderboardConfig,
        source: Arc<dyn TransferSource>,
        lookup: Arc<dyn ProfileLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let enricher = ProfileEnricher::new(lookup, config.retry, config.profile_base.clone());
        let cache = LeaderboardCache::new(config.cache_ttl, clock);
        Self {
            pipeline: Arc::new(Pipeline {
                config,
                source,
                enricher,
                cache,
            }),
            in_flight: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LeaderboardConfig {
        &self.pipeline.config
    }

    /// The leaderboard read: cached if fresh, recomputed otherwise.
    pub async fn get_leaderboard(&self) -> Result<LeaderboardResponse, LeaderboardError> {
        if let CacheLookup::Fresh(record) = self.pipeline.cache.lookup() {
            return Ok(LeaderboardResponse::from_record(&record, true));
        }
        let (record, from_cache) = self.refresh_shared(false).await?;
        Ok(LeaderboardResponse::from_record(&record, from_cache))
    }

    /// Recompute regardless of cache freshness. Still shares a running recomputation.
    pub async fn refresh(&self) -> Result<LeaderboardResponse, LeaderboardError> {
        let (record, from_cache) = self.refresh_shared(true).await?;
        Ok(LeaderboardResponse::from_record(&record, from_cache))
    }

    /// Last published leaderboard without touching the network, fresh or not.
    pub fn cached(&self) -> Option<LeaderboardResponse> {
        self.pipeline
            .cache
            .snapshot()
            .map(|record| LeaderboardResponse::from_record(&record, true))
    }

    /// Join the running recomputation or start one. Unless `force` is set, a
    /// record published while waiting for the slot is served instead.
    async fn refresh_shared(&self, force: bool) -> Result<Served, LeaderboardError> {
        let refresh = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.as_ref() {
                // a settled future left behind by a dropped caller must not be reused
                Some(running) if running.peek().is_none() => {
                    metrics::increment_refresh_joined();
                    running.clone()
                }
                _ => {
                    // the previous holder clears the slot only after publishing
                    if !force {
                        if let CacheLookup::Fresh(record) = self.pipeline.cache.lookup() {
                            return Ok((record, true));
                        }
                    }
                    let refresh = self.spawn_refresh();
                    *in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = refresh.clone().await;

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight
                .as_ref()
                .map_or(false, |running| running.ptr_eq(&refresh))
            {
                *in_flight = None;
            }
        }

        if let Err(e) = &result {
            metrics::increment_refresh_failures();
            match self.pipeline.cache.snapshot() {
                Some(previous) => warn!(
                    "Leaderboard refresh failed, keeping snapshot from {}: {}",
                    previous.computed_at, e
                ),
                None => warn!("Leaderboard refresh failed with nothing cached: {}", e),
            }
        }
        result.map(|record| (record, false))
    }

    fn spawn_refresh(&self) -> SharedRefresh {
        let pipeline = Arc::clone(&self.pipeline);
        let handle = tokio::spawn(async move { pipeline.run().await });
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(LeaderboardError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard_cache::ManualClock;
    use crate::profile_enricher::{ProfileError, ProfileRecord};
    use crate::transfer_fetcher::{TransferPage, TransferQuery, TransferRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[derive(Default)]
    struct CountingLedger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransferSource for CountingLedger {
        async fn fetch_page(&self, _query: &TransferQuery) -> Result<TransferPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransferPage {
                transfers: vec![TransferRecord::to(WALLET)],
                next_page_key: None,
            })
        }
    }

    struct NoProfiles;

    #[async_trait]
    impl ProfileLookup for NoProfiles {
        async fn lookup(&self, _address: &str) -> Result<ProfileRecord, ProfileError> {
            Err(ProfileError::NotFound)
        }
    }

    fn assembler(ledger: Arc<CountingLedger>) -> LeaderboardAssembler {
        let config = LeaderboardConfig {
            contract_address: "0x6292bf78996e189bAd8f9CF3e3Cb31017bb70540".into(),
            source_address: "0xeBeA10BCd609d3F6fb2Ea104baB638396C037388".into(),
            cache_ttl: Duration::from_secs(3600),
            enrichment_batch_size: 10,
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
            profile_base: "https://www.rip.fun/profile/".into(),
        };
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        LeaderboardAssembler::new(config, ledger, Arc::new(NoProfiles), clock)
    }

    #[tokio::test]
    async fn test_reader_behind_finished_refresh_uses_its_record() {
        let ledger = Arc::new(CountingLedger::default());
        let assembler = assembler(ledger.clone());

        // a refresh completed between this reader's stale check and taking the slot
        let published = assembler.pipeline.cache.publish(CacheRecord::new(
            assembler.pipeline.cache.now(),
            vec![LeaderboardEntry::unenriched("0xabc".into(), 9)],
        ));

        let (record, from_cache) = assembler.refresh_shared(false).await.unwrap();
        assert!(from_cache);
        assert!(Arc::ptr_eq(&record, &published));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);

        // forced refreshes still recompute
        let (record, from_cache) = assembler.refresh_shared(true).await.unwrap();
        assert!(!from_cache);
        assert_eq!(record.entries[0].wallet_address, WALLET);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_entry_serializes_camel_case_with_nulls() {
        let entry = LeaderboardEntry::unenriched("0xabc".into(), 3);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "walletAddress": "0xabc",
                "transferCount": 3,
                "username": null,
                "avatar": null,
                "profileUrl": null
            })
        );
    }

    #[test]
    fn test_with_profile_keeps_rank_fields() {
        let entry = LeaderboardEntry::unenriched("0xabc".into(), 7).with_profile(Profile {
            username: Some("alice".into()),
            avatar: None,
            profile_url: "https://www.rip.fun/profile/alice".into(),
        });
        assert_eq!(entry.wallet_address, "0xabc");
        assert_eq!(entry.transfer_count, 7);
        assert_eq!(entry.username.as_deref(), Some("alice"));
        assert!(entry.is_enriched());
    }

    #[test]
    fn test_response_shape() {
        let record = CacheRecord::new(
            DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            vec![LeaderboardEntry::unenriched("0xabc".into(), 1)],
        );
        let json = serde_json::to_value(LeaderboardResponse::from_record(&record, true)).unwrap();
        assert_eq!(json["servedFromCache"], true);
        assert_eq!(json["computedAt"], "2024-06-01T12:00:00Z");
        assert_eq!(json["entries"][0]["walletAddress"], "0xabc");
    }
}
