//! # Profile Enricher
//!
//! Attaches rip.fun profile metadata (username, avatar, profile link) to the
//! top leaderboard addresses.
//!
//! ## Failure Model
//!
//! Enrichment is best effort. Every address gets its own lookup and its own
//! retry budget:
//!
//! - `404` is a definitive "no profile" and is never retried
//! - `429`, `5xx` and timeouts are retried with exponential backoff
//!   (`base_delay * 2^n`) up to `max_attempts`
//! - anything else, or running out of attempts, leaves the address without a profile
//!
//! A failed address is simply missing from the returned map; the batch itself
//! never fails.

use crate::metrics;
use crate::settings::EnrichmentSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Profile payload returned by the lookup service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Resolved profile attached to a leaderboard entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub profile_url: String,
}

/// Link to a profile page, keyed by username when there is one.
pub fn profile_url(profile_base: &str, username: Option<&str>, address: &str) -> String {
    format!("{}{}", profile_base, username.unwrap_or(address))
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// One request for one canonical address. No retries.
    async fn lookup(&self, address: &str) -> Result<ProfileRecord, ProfileError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found")]
    NotFound,
    #[error("rate limited (429)")]
    RateLimited,
    #[error("server error ({0})")]
    Server(u16),
    #[error("request rejected ({0})")]
    Rejected(u16),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed profile payload: {0}")]
    Malformed(String),
}

impl ProfileError {
    /// Errors worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProfileError::RateLimited | ProfileError::Server(_) | ProfileError::Timeout
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            ProfileError::NotFound => "not_found",
            ProfileError::RateLimited => "rate_limited",
            ProfileError::Server(_) => "server_error",
            ProfileError::Rejected(_) => "rejected",
            ProfileError::Timeout => "timeout",
            ProfileError::Transport(_) => "transport",
            ProfileError::Malformed(_) => "malformed",
        }
    }

    fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            None
        } else if status == StatusCode::NOT_FOUND {
            Some(ProfileError::NotFound)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(ProfileError::RateLimited)
        } else if status.is_server_error() {
            Some(ProfileError::Server(status.as_u16()))
        } else {
            Some(ProfileError::Rejected(status.as_u16()))
        }
    }
}

impl From<reqwest::Error> for ProfileError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProfileError::Timeout
        } else if err.is_decode() {
            ProfileError::Malformed(err.to_string())
        } else {
            ProfileError::Transport(err.to_string())
        }
    }
}

/// A profile that could not be resolved, with the last error seen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("profile unavailable for {address} after {attempts} attempt(s): {reason}")]
pub struct ProfileUnavailable {
    pub address: String,
    pub attempts: u32,
    pub reason: ProfileError,
}

/// rip.fun `GET /api/auth/<address>` client.
pub struct RipProfileClient {
    client: reqwest::Client,
    api_base: String,
}

impl RipProfileClient {
    pub fn new(api_base: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create profile HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    pub fn from_settings(settings: &EnrichmentSettings) -> Result<Self> {
        Self::new(
            settings.api_base.clone(),
            Duration::from_millis(settings.request_timeout_ms),
        )
    }
}

#[async_trait]
impl ProfileLookup for RipProfileClient {
    async fn lookup(&self, address: &str) -> Result<ProfileRecord, ProfileError> {
        let url = format!("{}{}", self.api_base, address);
        let response = self.client.get(&url).send().await?;

        if let Some(err) = ProfileError::from_status(response.status()) {
            return Err(err);
        }
        Ok(response.json::<ProfileRecord>().await?)
    }
}

/// Per-address retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `retry` (0-based): `base_delay * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(400))
    }
}

pub struct ProfileEnricher {
    lookup: Arc<dyn ProfileLookup>,
    retry: RetryPolicy,
    profile_base: String,
}

impl ProfileEnricher {
    pub fn new(
        lookup: Arc<dyn ProfileLookup>,
        retry: RetryPolicy,
        profile_base: impl Into<String>,
    ) -> Self {
        Self {
            lookup,
            retry,
            profile_base: profile_base.into(),
        }
    }

    /// Resolve profiles for every address in the batch concurrently.
    ///
    /// Returns only the addresses that resolved; waits for every lookup
    /// (including retries) to settle before returning.
    pub async fn enrich(&self, addresses: &[String]) -> HashMap<String, Profile> {
        if addresses.is_empty() {
            return HashMap::new();
        }
        let start = Instant::now();

        let tasks = addresses.iter().map(|address| async move {
            let outcome = self.resolve(address).await;
            (address, outcome)
        });
        let results = join_all(tasks).await;

        let mut profiles = HashMap::with_capacity(results.len());
        for (address, outcome) in results {
            match outcome {
                Ok(record) => {
                    let profile_url =
                        profile_url(&self.profile_base, record.username.as_deref(), address);
                    profiles.insert(
                        address.clone(),
                        Profile {
                            username: record.username,
                            avatar: record.avatar,
                            profile_url,
                        },
                    );
                }
                Err(unavailable) => debug!("{}", unavailable),
            }
        }

        let elapsed = start.elapsed();
        metrics::record_enrichment_duration(elapsed);
        info!(
            "ProfileEnricher: resolved {}/{} profiles in {:?}",
            profiles.len(),
            addresses.len(),
            elapsed
        );
        profiles
    }

    async fn resolve(&self, address: &str) -> Result<ProfileRecord, ProfileUnavailable> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.lookup.lookup(address).await {
                Ok(record) => {
                    metrics::increment_profile_lookup("found");
                    return Ok(record);
                }
                Err(err) if err.is_transient() && attempts < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempts - 1);
                    metrics::increment_profile_retry(err.kind());
                    debug!(
                        "Profile lookup for {} failed ({}), retrying in {:?} (attempt {}/{})",
                        address, err, delay, attempts, self.retry.max_attempts
                    );
                    sleep(delay).await;
                }
                Err(reason) => {
                    let outcome = match &reason {
                        ProfileError::NotFound => "not_found",
                        e if e.is_transient() => "exhausted",
                        _ => "failed",
                    };
                    metrics::increment_profile_lookup(outcome);
                    return Err(ProfileUnavailable {
                        address: address.to_string(),
                        attempts,
                        reason,
                    });
                }
            }
        }
    }
}
