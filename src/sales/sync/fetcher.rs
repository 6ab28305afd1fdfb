use crate::ledger::{ExtractRequest, ExtractResponse, LedgerApi, ServerSlice, VoucherRecord};
use crate::sales::sync::chunking::{DateChunk, split_date_range};
use crate::sales::sync::merge::FetchedBatch;
use crate::sales::sync::policy::FetchPolicy;
use crate::sales::sync::progress_tracker::{FetchStats, ProgressReporter, SyncProgressTracker};
use crate::sales::sync::retry::with_retry;
use crate::sales::{SalesSyncError, SyncMode, TenantContext};
use crate::utils::{format_span, format_wire_date};

use chrono::NaiveDate;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to fetch for one sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
	pub tenant: TenantContext,
	pub from: NaiveDate,
	pub to: NaiveDate,
	/// High-water mark of the cached snapshot; `None` means a full fetch.
	pub last_alter_id: Option<i64>,
}

impl FetchRequest {
	pub fn mode(&self) -> SyncMode {
		match self.last_alter_id {
			Some(_) => SyncMode::Incremental,
			None => SyncMode::Full,
		}
	}

	fn extract_request(&self, from: NaiveDate, to: NaiveDate, serverslice: ServerSlice) -> ExtractRequest {
		ExtractRequest {
			tallyloc_id: self.tenant.tallyloc_id,
			company: self.tenant.company.clone(),
			guid: self.tenant.guid.clone(),
			fromdate: format_wire_date(from),
			todate: format_wire_date(to),
			serverslice,
			lastaltid: self.last_alter_id,
		}
	}
}

/// Vouchers gathered by one fetch plus how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
	pub batch: FetchedBatch,
	pub stats: FetchStats,
}

/// Retrieves a date range of vouchers, slicing it when the server or the link cannot cope.
///
/// A single unchunked request is tried first. If the server asks for client-side slicing, or
/// the request times out or fails with a server-class error, the range is split into
/// `chunk_days` windows fetched one after another in date order. Any other failure, and any
/// chunk that still fails after its retries, fails the whole fetch.
pub struct ChunkedFetcher {
	api: Arc<dyn LedgerApi>,
	policy: FetchPolicy,
}

impl ChunkedFetcher {
	pub fn new(api: Arc<dyn LedgerApi>, policy: FetchPolicy) -> Self {
		Self { api, policy }
	}

	pub fn policy(&self) -> &FetchPolicy {
		&self.policy
	}

	pub async fn fetch(
		&self,
		request: &FetchRequest,
		reporter: ProgressReporter,
		cancel: &CancellationToken,
	) -> Result<FetchResult, SalesSyncError> {
		if request.from > request.to {
			return Err(SalesSyncError::InvalidRange(format!(
				"start {} is after end {}",
				request.from, request.to
			)));
		}

		let mut tracker = SyncProgressTracker::new(reporter);
		let span = format_span(request.from, request.to);
		info!(
			"Starting {:?} fetch for {} ({}, last alter id {:?})",
			request.mode(),
			request.tenant,
			span,
			request.last_alter_id
		);

		tracker.begin_probe(format!("Fetching sales data for {}", span));
		let probe_request = request.extract_request(request.from, request.to, ServerSlice::Yes);
		let api = &self.api;
		let probe = with_retry(
			&self.policy,
			self.policy.probe_attempts,
			"probe",
			cancel,
			|| api.extract(&probe_request),
		)
		.await;

		match probe {
			Ok(response) if response.requests_frontend_slice() => {
				info!("Server asked for client-side slicing of {}", span);
			}
			Ok(response) => {
				let records = response.voucher_records();
				tracker.record_probe(records.as_ref().map(Vec::len));
				if records.is_none() {
					warn!("Extract response for {} had no voucher array", span);
				}
				let stats = tracker.get_stats();
				info!("Fetch completed: {}", stats.summary());
				return Ok(FetchResult {
					batch: FetchedBatch {
						well_formed: records.is_some(),
						vouchers: records.unwrap_or_default(),
					},
					stats,
				});
			}
			Err(e) if e.suggests_chunking() => {
				warn!("Unchunked fetch of {} failed ({}), switching to chunks", span, e);
			}
			Err(e) => return Err(e),
		}

		self.fetch_chunks(request, &mut tracker, cancel).await
	}

	async fn fetch_chunks(
		&self,
		request: &FetchRequest,
		tracker: &mut SyncProgressTracker,
		cancel: &CancellationToken,
	) -> Result<FetchResult, SalesSyncError> {
		let chunks = split_date_range(request.from, request.to, self.policy.chunk_days)?;
		tracker.begin_chunks(chunks.len());

		let mut vouchers: Vec<VoucherRecord> = Vec::new();
		let mut well_formed = true;

		for (index, chunk) in chunks.iter().enumerate() {
			if cancel.is_cancelled() {
				return Err(SalesSyncError::Cancelled);
			}

			let response = self.fetch_chunk(request, index, chunks.len(), chunk, cancel).await?;
			let records = response.voucher_records();
			tracker.record_chunk(index, chunk, records.as_ref().map(Vec::len));

			match records {
				Some(records) => {
					debug!("Chunk {} returned {} vouchers", chunk.label(), records.len());
					vouchers.extend(records);
				}
				None => {
					warn!("Chunk {} had no voucher array", chunk.label());
					well_formed = false;
				}
			}
		}

		let stats = tracker.get_stats();
		info!("Chunked fetch completed: {}", stats.summary());
		Ok(FetchResult {
			batch: FetchedBatch {
				vouchers,
				well_formed,
			},
			stats,
		})
	}

	async fn fetch_chunk(
		&self,
		request: &FetchRequest,
		index: usize,
		total: usize,
		chunk: &DateChunk,
		cancel: &CancellationToken,
	) -> Result<ExtractResponse, SalesSyncError> {
		let chunk_request = request.extract_request(chunk.start, chunk.end, ServerSlice::No);
		let label = format!("chunk {}/{} ({})", index + 1, total, chunk.label());
		let api = &self.api;
		with_retry(
			&self.policy,
			self.policy.chunk_attempts,
			&label,
			cancel,
			|| api.extract(&chunk_request),
		)
		.await
	}
}
