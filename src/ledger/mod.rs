//! Remote ledger integration module
//!
//! This module provides the client and types for the connector's voucher extract endpoint,
//! including normalization of raw voucher JSON into the canonical record type used by the
//! sync engine.

/// HTTP client and the `LedgerApi` seam
mod client;
/// Wire types, voucher normalization and boundary errors
mod types;

pub use client::{LedgerApi, TallyLedgerClient};
pub use types::*;
