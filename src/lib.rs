//! Incremental synchronization of sales vouchers from a remote ERP ledger into a local cache.

pub mod config;
pub mod ledger;
pub mod sales;
pub mod utils;
