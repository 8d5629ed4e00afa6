// src/normalization.rs
//
// Address normalization: validates recipient strings coming off the ledger and
// converts them to their EIP-55 checksummed form so that every spelling of an
// address collapses to a single leaderboard key.

use ethers::types::Address;
use ethers::utils::to_checksum;
use std::str::FromStr;

/// Number of hex digits in a 20-byte address.
const ADDRESS_HEX_LEN: usize = 40;

/// Canonical spelling of the burn address.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Parse a `0x`-prefixed, 40-hex-digit address (any letter case).
///
/// Mixed-case input is accepted without verifying its checksum: the ledger
/// returns lowercase addresses and we only need a stable key.
pub fn parse_address(raw: &str) -> Result<Address, NormalizationError> {
    let body = raw
        .strip_prefix("0x")
        .ok_or_else(|| NormalizationError::InvalidAddress(raw.to_string()))?;

    if body.len() != ADDRESS_HEX_LEN || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NormalizationError::InvalidAddress(raw.to_string()));
    }

    Address::from_str(body).map_err(|_| NormalizationError::InvalidAddress(raw.to_string()))
}

/// Validate `raw` and return its canonical checksummed form.
pub fn normalize_address(raw: &str) -> Result<String, NormalizationError> {
    parse_address(raw).map(|addr| checksum(&addr))
}

/// EIP-55 checksum of an already-parsed address.
#[inline]
pub fn checksum(address: &Address) -> String {
    to_checksum(address, None)
}

#[inline]
pub fn is_zero_address(address: &Address) -> bool {
    address.is_zero()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),
}
