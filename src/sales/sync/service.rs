//! The sync routine a coordinator session runs for one tenant.
//!
//! `SalesSyncService` reads the tenant's cached high-water mark to choose between a full and an
//! incremental fetch, pulls vouchers through the [`ChunkedFetcher`], folds them into the cached
//! snapshot with the [`MergeEngine`], and writes the result back. A fetch that yields nothing
//! usable never overwrites the cache.

use crate::ledger::LedgerApi;
use crate::sales::sync::fetcher::{ChunkedFetcher, FetchRequest};
use crate::sales::sync::merge::{MergeEngine, MergeResult};
use crate::sales::sync::policy::FetchPolicy;
use crate::sales::sync::progress_tracker::ProgressReporter;
use crate::sales::sync::repositories::CacheStore;
use crate::sales::{
	SalesSnapshot, SalesSyncError, SnapshotSource, SyncMetadata, SyncMode, SyncOutcome, TenantContext,
};
use crate::utils::format_span;

use chrono::NaiveDate;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Date range requested by a sync, plus the company's books start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
	pub from: NaiveDate,
	pub to: NaiveDate,
	pub books_from: NaiveDate,
}

pub struct SalesSyncService {
	fetcher: ChunkedFetcher,
	cache: Arc<dyn CacheStore>,
	merge_engine: MergeEngine,
}

impl SalesSyncService {
	pub fn new(api: Arc<dyn LedgerApi>, cache: Arc<dyn CacheStore>, policy: FetchPolicy) -> Self {
		Self {
			fetcher: ChunkedFetcher::new(api, policy),
			cache,
			merge_engine: MergeEngine::new(),
		}
	}

	/// Run one sync for `tenant` over `window`.
	pub async fn sync(
		&self,
		tenant: TenantContext,
		window: SyncWindow,
		reporter: ProgressReporter,
		cancel: CancellationToken,
	) -> Result<SyncOutcome, SalesSyncError> {
		let cached = self.cache.get_complete_sales_data(&tenant).await?;
		let mut last_alter_id = self.cache.get_last_alter_id(&tenant).await?;
		let metadata = self.cache.get_metadata(&tenant).await?;

		if last_alter_id.is_some() && cached.is_none() {
			warn!(
				"Sales metadata for {} has no snapshot beside it, running a full sync",
				tenant
			);
			last_alter_id = None;
		}

		let request = FetchRequest {
			tenant: tenant.clone(),
			from: window.from,
			to: window.to,
			last_alter_id,
		};
		let mode = request.mode();
		info!(
			"Syncing sales for {} ({}, {:?})",
			tenant,
			format_span(window.from, window.to),
			mode
		);

		let fetched = self.fetcher.fetch(&request, reporter, &cancel).await?;
		let chunks = fetched.stats.steps;

		// A cancelled session may already have been replaced; it must not write.
		if cancel.is_cancelled() {
			return Err(SalesSyncError::Cancelled);
		}

		let existing = cached.map(|snapshot| snapshot.vouchers);
		let merged = self.merge_engine.merge(mode, existing, fetched.batch)?;

		match merged {
			MergeResult::Updated {
				vouchers,
				new_unique,
				last_alter_id,
				..
			} => {
				let books_from = match (mode, metadata) {
					(SyncMode::Incremental, Some(metadata)) => metadata.books_from,
					_ => window.books_from,
				};
				let count = vouchers.len();
				let snapshot = SalesSnapshot { vouchers };
				self.cache
					.set_complete_sales_data(
						&tenant,
						&snapshot,
						&SyncMetadata {
							books_from,
							last_alter_id,
						},
					)
					.await?;

				info!(
					"Sales sync for {} stored {} vouchers ({} new, last alter id {:?})",
					tenant, count, new_unique, last_alter_id
				);
				Ok(SyncOutcome {
					success: true,
					count,
					last_alter_id,
					new_records: new_unique,
					mode,
					source: match mode {
						SyncMode::Full => SnapshotSource::Replaced,
						SyncMode::Incremental => SnapshotSource::Merged,
					},
					chunks,
				})
			}
			MergeResult::KeepExisting {
				count,
				last_alter_id,
			} => {
				warn!(
					"Sales sync for {} kept the cached snapshot of {} vouchers",
					tenant, count
				);
				Ok(SyncOutcome {
					success: false,
					count,
					last_alter_id,
					new_records: 0,
					mode,
					source: SnapshotSource::ReusedCache,
					chunks,
				})
			}
		}
	}

	/// Package [`SalesSyncService::sync`] as the routine a coordinator session runs.
	pub fn sync_fn(
		self: &Arc<Self>,
		window: SyncWindow,
	) -> impl FnOnce(
		TenantContext,
		ProgressReporter,
		CancellationToken,
	) -> BoxFuture<'static, Result<SyncOutcome, SalesSyncError>>
	+ Send
	+ 'static {
		let service = Arc::clone(self);
		move |tenant, reporter, cancel| {
			async move { service.sync(tenant, window, reporter, cancel).await }.boxed()
		}
	}
}
