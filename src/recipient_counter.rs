// src/recipient_counter.rs
//
// Single pass over every transfer page that builds the ranking signal: how many
// times each canonical recipient received the collectible from the source address.

use crate::metrics;
use crate::normalization::{checksum, is_zero_address, parse_address};
use crate::transfer_fetcher::{transfer_pages, FetchError, TransferSource};
use futures::TryStreamExt;
use indexmap::IndexMap;
use log::{debug, info};

/// What happened to a single transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Counted,
    MissingRecipient,
    ZeroAddress,
    InvalidAddress,
}

impl RecordOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Counted => "counted",
            RecordOutcome::MissingRecipient => "missing_recipient",
            RecordOutcome::ZeroAddress => "zero_address",
            RecordOutcome::InvalidAddress => "invalid_address",
        }
    }
}

/// An address and how many transfers it received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedAddress {
    pub address: String,
    pub count: u64,
}

/// Transfer counts keyed by checksummed recipient.
///
/// Keys keep the order in which each address was first counted, which is what
/// the stable sort in [`AddressCount::into_ranked`] falls back on for ties.
#[derive(Debug, Clone, Default)]
pub struct AddressCount {
    counts: IndexMap<String, u64>,
}

impl AddressCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one transfer to `recipient`, skipping anything that is not a
    /// valid non-zero address.
    pub fn record(&mut self, recipient: Option<&str>) -> RecordOutcome {
        let Some(raw) = recipient else {
            return RecordOutcome::MissingRecipient;
        };
        let address = match parse_address(raw) {
            Ok(address) => address,
            Err(e) => {
                debug!("Skipping transfer: {}", e);
                return RecordOutcome::InvalidAddress;
            }
        };
        if is_zero_address(&address) {
            return RecordOutcome::ZeroAddress;
        }

        *self.counts.entry(checksum(&address)).or_insert(0) += 1;
        RecordOutcome::Counted
    }

    pub fn get(&self, address: &str) -> Option<u64> {
        self.counts.get(address).copied()
    }

    /// Number of distinct recipients.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// Descending by count; equal counts stay in first-counted order.
    pub fn into_ranked(self) -> Vec<RankedAddress> {
        let mut ranked: Vec<RankedAddress> = self
            .counts
            .into_iter()
            .map(|(address, count)| RankedAddress { address, count })
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked
    }
}

/// Per-run bookkeeping for the counting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountSummary {
    pub pages: u64,
    pub records: u64,
    pub counted: u64,
    pub missing_recipient: u64,
    pub zero_address: u64,
    pub invalid_address: u64,
}

impl CountSummary {
    fn observe(&mut self, outcome: RecordOutcome) {
        self.records += 1;
        match outcome {
            RecordOutcome::Counted => self.counted += 1,
            RecordOutcome::MissingRecipient => self.missing_recipient += 1,
            RecordOutcome::ZeroAddress => self.zero_address += 1,
            RecordOutcome::InvalidAddress => self.invalid_address += 1,
        }
    }

    fn export(&self) {
        for (outcome, count) in [
            (RecordOutcome::Counted, self.counted),
            (RecordOutcome::MissingRecipient, self.missing_recipient),
            (RecordOutcome::ZeroAddress, self.zero_address),
            (RecordOutcome::InvalidAddress, self.invalid_address),
        ] {
            if count > 0 {
                metrics::increment_transfer_records(outcome.as_str(), count);
            }
        }
    }
}

/// Drain every page of transfers from `from_address` and count recipients.
///
/// There is no page cap: the loop ends only when the source stops returning a
/// continuation token. Any page failure aborts the whole count.
pub async fn count_recipients<S>(
    source: &S,
    contract_address: &str,
    from_address: &str,
) -> Result<(AddressCount, CountSummary), FetchError>
where
    S: TransferSource + ?Sized,
{
    let mut counts = AddressCount::new();
    let mut summary = CountSummary::default();

    let mut pages = Box::pin(transfer_pages(source, contract_address, from_address));
    while let Some(transfers) = pages.try_next().await? {
        summary.pages += 1;
        for transfer in &transfers {
            let outcome = counts.record(transfer.recipient.as_deref());
            summary.observe(outcome);
        }
    }

    summary.export();
    info!(
        "Counted {} transfers to {} recipients over {} pages (skipped: {} missing, {} zero, {} invalid)",
        summary.counted,
        counts.len(),
        summary.pages,
        summary.missing_recipient,
        summary.zero_address,
        summary.invalid_address
    );

    Ok((counts, summary))
}
