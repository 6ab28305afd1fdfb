//! Sales Synchronization Module
//!
//! This module provides the core logic for keeping a tenant's cached sales vouchers in step with
//! the remote ledger. It is composed of several submodules, each responsible for one part of a
//! sync:
//!
//! - `coordinator`: Process-wide single-flight sessions and progress broadcast.
//! - `service`: The sync routine itself (read cache, fetch, merge, write).
//! - `fetcher`: Unchunked probe with fallback to sequential date chunks.
//! - `retry`: Per-request timeout and bounded exponential backoff.
//! - `chunking`: Splitting a date range into contiguous windows.
//! - `merge`: Voucher identity, deduplication and the high-water mark.
//! - `repositories`: Per-tenant snapshot and metadata storage.
//! - `progress_tracker`: Progress bookkeeping for one fetch.
//! - `policy`: Timeouts, attempt budgets and chunk sizes.

/// Date range tiling
pub mod chunking;
/// Single-flight coordination of sync sessions
pub mod coordinator;
/// Chunked voucher fetching
pub mod fetcher;
/// Deduplicating merge of fetched vouchers into the cache
pub mod merge;
/// Fetch tuning per network profile
pub mod policy;
/// Tracks fetch progress and statistics
pub mod progress_tracker;
/// Cache storage for snapshots and metadata
pub mod repositories;
pub mod retry;
/// The composed sync routine
pub mod service;

pub use coordinator::{CoordinatorConfig, Subscription, SyncCoordinator, SyncResult};
pub use fetcher::{ChunkedFetcher, FetchRequest, FetchResult};
pub use merge::{CompositeKey, FetchedBatch, MergeEngine, MergeResult};
pub use policy::{FetchPolicy, NetworkProfile};
pub use progress_tracker::{FetchStats, ProgressReporter};
pub use repositories::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use service::{SalesSyncService, SyncWindow};
