//!
//! Utility module for the sales sync engine.
//!
//! Re-exports date formatting helpers shared by the ledger boundary and the fetcher.
/// Wire date and span formatting
pub mod index;

pub use index::{format_span, format_wire_date, parse_wire_date};
