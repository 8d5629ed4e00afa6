//! # Transfer Leaderboard
//!
//! Ranks wallets by how many collectibles they received from a mint address on
//! Base, and decorates the top of the ranking with rip.fun profile data.
//!
//! ## Overview
//!
//! - **Ledger**: pages through `alchemy_getAssetTransfers` for one contract and source
//! - **Counting**: canonical (EIP-55) recipient keys, zero and malformed addresses dropped
//! - **Enrichment**: concurrent profile lookups with per-address retry and backoff
//! - **Caching**: one TTL-bounded snapshot, refreshed by a single in-flight recomputation
//!
//! ## Architecture
//!
//! ### Ledger Layer
//! [`transfer_fetcher`] exposes the page sequence as a lazy stream behind the
//! [`transfer_fetcher::TransferSource`] trait; [`recipient_counter`] drains it.
//!
//! ### Profile Layer
//! [`profile_enricher`] resolves a batch of addresses without ever failing the batch.
//!
//! ### Serving Layer
//! [`leaderboard`] assembles, caches ([`leaderboard_cache`]) and serves the result.

// Core
/// Address parsing and EIP-55 canonicalization
pub mod normalization;
/// Paginated transfer history from the ledger provider
pub mod transfer_fetcher;
/// Per-recipient transfer counting and ranking
pub mod recipient_counter;
/// Profile lookups with retry
pub mod profile_enricher;

// Serving
/// TTL snapshot cache
pub mod leaderboard_cache;
/// Pipeline assembly and the leaderboard read
pub mod leaderboard;

// Infrastructure
/// Layered configuration
pub mod settings;
/// Metrics (no-op unless the `observability` feature is on)
pub mod metrics;

pub use leaderboard::{
    LeaderboardAssembler, LeaderboardConfig, LeaderboardEntry, LeaderboardError,
    LeaderboardResponse,
};
pub use settings::Settings;
