use crate::leaderboard::LeaderboardConfig;
use crate::normalization::normalize_address;
use crate::profile_enricher::RetryPolicy;
use anyhow::{anyhow, Context};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    /// Alchemy key. Required by the Alchemy source, not by the pipeline itself.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rpc_url_base")]
    pub rpc_url_base: String,
    #[serde(default = "default_contract_address")]
    pub contract_address: String,
    #[serde(default = "default_source_address")]
    pub source_address: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_ledger_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_rpc_url_base() -> String {
    "https://base-mainnet.g.alchemy.com/v2/".to_string()
}
fn default_contract_address() -> String {
    "0x6292bf78996e189bAd8f9CF3e3Cb31017bb70540".to_string()
}
fn default_source_address() -> String {
    "0xeBeA10BCd609d3F6fb2Ea104baB638396C037388".to_string()
}
fn default_page_size() -> u32 {
    1000 // Alchemy max
}
fn default_ledger_timeout_ms() -> u64 {
    30_000
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            rpc_url_base: default_rpc_url_base(),
            contract_address: default_contract_address(),
            source_address: default_source_address(),
            page_size: default_page_size(),
            request_timeout_ms: default_ledger_timeout_ms(),
        }
    }
}

impl LedgerSettings {
    /// Full JSON-RPC endpoint: `rpc_url_base` followed by the API key.
    pub fn endpoint(&self) -> anyhow::Result<Url> {
        let key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("ledger.api_key is not set (ALCHEMY_API_KEY)"))?;
        Url::parse(&format!("{}{}", self.rpc_url_base, key))
            .with_context(|| format!("invalid ledger.rpc_url_base '{}'", self.rpc_url_base))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    3600 // 60 minutes
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_profile_base")]
    pub profile_base: String,
    #[serde(default = "default_enrichment_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_batch_size() -> usize {
    200
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    400
}
fn default_api_base() -> String {
    "https://www.rip.fun/api/auth/".to_string()
}
fn default_profile_base() -> String {
    "https://www.rip.fun/profile/".to_string()
}
fn default_enrichment_timeout_ms() -> u64 {
    10_000
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            api_base: default_api_base(),
            profile_base: default_profile_base(),
            request_timeout_ms: default_enrichment_timeout_ms(),
        }
    }
}

impl EnrichmentSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[default]
    #[serde(rename = "pretty")]
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9000
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub enrichment: EnrichmentSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Settings {
    /// `Leaderboard.toml` if present, then `LEADERBOARD__*` and the legacy variables.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Same layering as [`Settings::new`] but with an explicit (required) file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("Leaderboard").required(false),
        };
        let s = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("LEADERBOARD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        apply_legacy_env(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    /// File only, no environment. Used by tooling and tests.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("ledger.contract_address", &self.ledger.contract_address),
            ("ledger.source_address", &self.ledger.source_address),
        ] {
            normalize_address(value)
                .map_err(|e| ConfigError::Message(format!("{}: {}", field, e)))?;
        }
        if self.ledger.page_size == 0 {
            return Err(ConfigError::Message("ledger.page_size must be > 0".into()));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::Message("cache.ttl_seconds must be > 0".into()));
        }
        if self.enrichment.max_attempts == 0 {
            return Err(ConfigError::Message(
                "enrichment.max_attempts must be > 0".into(),
            ));
        }
        for (field, value) in [
            ("enrichment.api_base", &self.enrichment.api_base),
            ("enrichment.profile_base", &self.enrichment.profile_base),
        ] {
            Url::parse(value)
                .map_err(|e| ConfigError::Message(format!("{}: {}", field, e)))?;
        }
        Ok(())
    }

    /// Assembler configuration with addresses in canonical form.
    pub fn leaderboard_config(&self) -> Result<LeaderboardConfig, ConfigError> {
        let canonical = |field: &str, value: &str| {
            normalize_address(value).map_err(|e| ConfigError::Message(format!("{}: {}", field, e)))
        };
        Ok(LeaderboardConfig {
            contract_address: canonical("ledger.contract_address", &self.ledger.contract_address)?,
            source_address: canonical("ledger.source_address", &self.ledger.source_address)?,
            cache_ttl: Duration::from_secs(self.cache.ttl_seconds),
            enrichment_batch_size: self.enrichment.batch_size,
            retry: self.enrichment.retry_policy(),
            profile_base: self.enrichment.profile_base.clone(),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Flat variables from the original deployment win over everything else.
fn apply_legacy_env(settings: &mut Settings) {
    if let Some(key) = non_empty_var("ALCHEMY_API_KEY") {
        settings.ledger.api_key = Some(key);
    }
    if let Some(contract) = non_empty_var("NFT_CONTRACT_ADDRESS") {
        settings.ledger.contract_address = contract;
    }
    if let Some(source) = non_empty_var("MINT_FROM_ADDRESS") {
        settings.ledger.source_address = source;
    }
    if let Some(raw) = non_empty_var("CACHE_TTL_MINUTES") {
        match raw.parse::<u64>() {
            Ok(minutes) => settings.cache.ttl_seconds = minutes.saturating_mul(60),
            Err(e) => eprintln!("Ignoring CACHE_TTL_MINUTES='{}': {}", raw, e),
        }
    }
}
