//! # Transfer Page Fetcher
//!
//! Pulls collectible transfer events out of the ledger query interface one page
//! at a time.
//!
//! ## Overview
//!
//! - [`TransferSource`]: one paginated request per call, returning the page's
//!   transfer records and the continuation token (`pageKey`) if there is more data.
//! - [`AlchemyTransferSource`]: `alchemy_getAssetTransfers` over JSON-RPC,
//!   restricted to ERC-721/ERC-1155 transfers with zero-value transfers excluded
//!   at the source.
//! - [`transfer_pages`]: the lazy, finite page sequence built on top of a source.
//!   Each pull is one round trip; the sequence ends once a page comes back without
//!   a continuation token, or right after the first failed pull.
//!
//! Page fetches are never retried here. A failed page aborts the computation that
//! requested it and the next leaderboard read starts over from the first page.

use crate::metrics;
use crate::settings::LedgerSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use futures::stream::{self, Stream};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use std::time::Duration;
use url::Url;

/// Hard cap on transfers per page accepted by the ledger query interface.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Collectible standards the leaderboard counts.
const TRANSFER_CATEGORIES: [&str; 2] = ["erc721", "erc1155"];

const ASSET_TRANSFERS_METHOD: &str = "alchemy_getAssetTransfers";

/// A single transfer as seen by the counter. Only the recipient matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    #[serde(rename = "to", default)]
    pub recipient: Option<String>,
}

impl TransferRecord {
    pub fn to(recipient: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
        }
    }

    pub fn without_recipient() -> Self {
        Self { recipient: None }
    }
}

/// One page of results plus the token for the next page, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPage {
    #[serde(default)]
    pub transfers: Vec<TransferRecord>,
    #[serde(rename = "pageKey", default)]
    pub next_page_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuery {
    pub contract_address: String,
    pub from_address: String,
    pub page_key: Option<String>,
}

/// A paginated source of transfer records.
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Fetch exactly one page. The caller loops until `next_page_key` is `None`.
    async fn fetch_page(&self, query: &TransferQuery) -> Result<TransferPage, FetchError>;
}

/// `alchemy_getAssetTransfers` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetTransfersParams<'a> {
    from_block: &'static str,
    from_address: &'a str,
    contract_addresses: [&'a str; 1],
    category: [&'static str; 2],
    with_metadata: bool,
    exclude_zero_value: bool,
    max_count: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_key: Option<&'a str>,
}

/// Ledger query client backed by Alchemy's enhanced transfers API.
pub struct AlchemyTransferSource {
    provider: Provider<Http>,
    page_size: u32,
}

impl AlchemyTransferSource {
    /// Build a client for `endpoint` (the full RPC URL, API key included).
    ///
    /// `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(endpoint: Url, page_size: u32, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create ledger HTTP client")?;
        let provider = Provider::new(Http::new_with_client(endpoint, client));

        Ok(Self {
            provider,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    pub fn from_settings(settings: &LedgerSettings) -> Result<Self> {
        let endpoint = settings.endpoint()?;
        Self::new(
            endpoint,
            settings.page_size,
            Duration::from_millis(settings.request_timeout_ms),
        )
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn params<'a>(&self, query: &'a TransferQuery) -> AssetTransfersParams<'a> {
        AssetTransfersParams {
            from_block: "0x0",
            from_address: &query.from_address,
            contract_addresses: [&query.contract_address],
            category: TRANSFER_CATEGORIES,
            with_metadata: false,
            exclude_zero_value: true,
            max_count: format!("{:#x}", self.page_size),
            page_key: query.page_key.as_deref(),
        }
    }
}

#[async_trait]
impl TransferSource for AlchemyTransferSource {
    async fn fetch_page(&self, query: &TransferQuery) -> Result<TransferPage, FetchError> {
        let params = self.params(query);
        self.provider
            .request::<_, TransferPage>(ASSET_TRANSFERS_METHOD, [params])
            .await
            .map_err(FetchError::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("ledger transport error: {0}")]
    Transport(String),
    #[error("ledger returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected ledger response: {0}")]
    Decode(String),
}

impl From<ProviderError> for FetchError {
    fn from(err: ProviderError) -> Self {
        if let Some(resp) = err.as_error_response() {
            return FetchError::Rpc {
                code: resp.code,
                message: resp.message.clone(),
            };
        }
        // The HTTP transport drops the status code, so a gateway error page
        // only shows up as a body that is not JSON at all.
        match err.as_serde_error().map(serde_json::Error::classify) {
            Some(Category::Data) => FetchError::Decode(err.to_string()),
            _ => FetchError::Transport(err.to_string()),
        }
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily walk every page of transfers from `from_address` for `contract_address`.
///
/// Pages are requested strictly in sequence since each request needs the token
/// returned by the previous one. An empty `pageKey` is treated as absent.
pub fn transfer_pages<'a, S>(
    source: &'a S,
    contract_address: &'a str,
    from_address: &'a str,
) -> impl Stream<Item = Result<Vec<TransferRecord>, FetchError>> + Send + 'a
where
    S: TransferSource + ?Sized,
{
    stream::try_unfold((Cursor::Start, 0u64), move |(cursor, fetched)| async move {
        let page_key = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => None,
            Cursor::Next(key) => Some(key),
        };

        let query = TransferQuery {
            contract_address: contract_address.to_string(),
            from_address: from_address.to_string(),
            page_key,
        };

        let page = source.fetch_page(&query).await.map_err(|e| {
            warn!("Transfer page {} fetch failed: {}", fetched + 1, e);
            e
        })?;
        metrics::increment_transfer_pages(1);
        debug!(
            "Fetched transfer page {} ({} transfers, more: {})",
            fetched + 1,
            page.transfers.len(),
            page.next_page_key.is_some()
        );

        let next = match page.next_page_key {
            Some(key) if !key.is_empty() => Cursor::Next(key),
            _ => Cursor::Done,
        };
        Ok(Some((page.transfers, (next, fetched + 1))))
    })
}
