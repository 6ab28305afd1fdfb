//! Progress tracking for a single sales fetch.
//!
//! This module provides the `SyncProgressTracker`, which records how far the fetcher has got
//! through its extract calls, counts the vouchers received, and pushes a [`Progress`] snapshot
//! through a [`ProgressReporter`] after every step. Progress only ever moves forward within
//! one fetch.

use crate::sales::Progress;
use crate::sales::sync::chunking::DateChunk;

use std::sync::Arc;
use tracing::info;

/// Cloneable callback handle the fetcher reports progress through.
#[derive(Clone)]
pub struct ProgressReporter {
	sink: Arc<dyn Fn(Progress) + Send + Sync>,
}

impl ProgressReporter {
	pub fn new(sink: impl Fn(Progress) + Send + Sync + 'static) -> Self {
		Self {
			sink: Arc::new(sink),
		}
	}

	/// A reporter that drops every update.
	pub fn noop() -> Self {
		Self::new(|_| {})
	}

	pub fn report(&self, progress: Progress) {
		(self.sink)(progress);
	}
}

impl std::fmt::Debug for ProgressReporter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProgressReporter").finish_non_exhaustive()
	}
}

/// Service for tracking fetch progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	reporter: ProgressReporter,
	/// Extract calls planned for this fetch
	total_steps: usize,
	/// Extract calls completed so far
	completed_steps: usize,
	/// Vouchers received across all completed calls
	vouchers_fetched: usize,
	/// Calls whose response had no usable voucher array
	malformed_batches: usize,
	/// Whether the fetch had to fall back to client-side slicing
	chunked: bool,
}

impl SyncProgressTracker {
	pub fn new(reporter: ProgressReporter) -> Self {
		Self {
			reporter,
			total_steps: 0,
			completed_steps: 0,
			vouchers_fetched: 0,
			malformed_batches: 0,
			chunked: false,
		}
	}

	/// Announce the single unchunked request.
	pub fn begin_probe(&mut self, message: impl Into<String>) {
		self.total_steps = 1;
		self.completed_steps = 0;
		self.reporter.report(Progress::new(0, 1, message));
	}

	/// Switch to chunked mode with `total` chunks.
	///
	/// The probe step is not carried over; chunk progress starts again from zero.
	pub fn begin_chunks(&mut self, total: usize) {
		self.chunked = true;
		self.total_steps = total;
		self.completed_steps = 0;
		self.reporter.report(Progress::new(
			0,
			total,
			format!("Fetching sales data in {} chunks", total),
		));
	}

	/// Record a completed probe.
	pub fn record_probe(&mut self, vouchers: Option<usize>) {
		self.record_batch(vouchers);
		self.completed_steps = 1;
		self.reporter
			.report(Progress::new(1, 1, format!("Fetched {} vouchers", self.vouchers_fetched)));
	}

	/// Record chunk `index` (zero based) as done.
	pub fn record_chunk(&mut self, index: usize, chunk: &DateChunk, vouchers: Option<usize>) {
		self.record_batch(vouchers);
		self.completed_steps = self.completed_steps.max(index + 1);
		self.reporter.report(Progress::new(
			self.completed_steps,
			self.total_steps,
			format!(
				"Fetched {} ({}/{})",
				chunk.label(),
				self.completed_steps,
				self.total_steps
			),
		));
		self.log_progress();
	}

	fn record_batch(&mut self, vouchers: Option<usize>) {
		match vouchers {
			Some(count) => self.vouchers_fetched += count,
			None => self.malformed_batches += 1,
		}
	}

	fn log_progress(&self) {
		info!(
			"Fetch progress: {}/{} chunks, {} vouchers so far",
			self.completed_steps, self.total_steps, self.vouchers_fetched
		);
	}

	/// Get fetch statistics as a FetchStats struct
	pub fn get_stats(&self) -> FetchStats {
		FetchStats {
			steps: self.completed_steps,
			vouchers_fetched: self.vouchers_fetched,
			malformed_batches: self.malformed_batches,
			chunked: self.chunked,
		}
	}
}

/// Statistics about one fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
	pub steps: usize,
	pub vouchers_fetched: usize,
	pub malformed_batches: usize,
	pub chunked: bool,
}

impl FetchStats {
	/// Get a human-readable summary of the fetch statistics
	pub fn summary(&self) -> String {
		format!(
			"{} vouchers in {} {}{}",
			self.vouchers_fetched,
			self.steps,
			if self.chunked { "chunks" } else { "request" },
			if self.malformed_batches == 0 {
				String::new()
			} else {
				format!(" ({} malformed)", self.malformed_batches)
			}
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::NaiveDate;
	use std::sync::Mutex;

	fn capture() -> (ProgressReporter, Arc<Mutex<Vec<Progress>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let reporter = ProgressReporter::new(move |progress| sink.lock().unwrap().push(progress));
		(reporter, seen)
	}

	fn chunk(start_day: u32, end_day: u32) -> DateChunk {
		DateChunk {
			start: NaiveDate::from_ymd_opt(2024, 4, start_day).unwrap(),
			end: NaiveDate::from_ymd_opt(2024, 4, end_day).unwrap(),
		}
	}

	#[test]
	fn chunk_progress_is_monotonic_and_labelled() {
		let (reporter, seen) = capture();
		let mut tracker = SyncProgressTracker::new(reporter);

		tracker.begin_chunks(3);
		tracker.record_chunk(0, &chunk(1, 5), Some(4));
		tracker.record_chunk(1, &chunk(6, 10), Some(2));
		tracker.record_chunk(2, &chunk(11, 12), Some(0));

		let seen = seen.lock().unwrap();
		let currents: Vec<usize> = seen.iter().map(|p| p.current).collect();
		assert_eq!(currents, vec![0, 1, 2, 3]);
		assert!(seen.iter().all(|p| p.total == 3));
		assert!(seen[1].message.contains("01-Apr-2024 to 05-Apr-2024"));

		let stats = tracker.get_stats();
		assert_eq!(stats.vouchers_fetched, 6);
		assert!(stats.chunked);
		assert_eq!(stats.summary(), "6 vouchers in 3 chunks");
	}

	#[test]
	fn malformed_batches_are_counted_separately() {
		let mut tracker = SyncProgressTracker::new(ProgressReporter::noop());
		tracker.begin_probe("Fetching");
		tracker.record_probe(None);

		let stats = tracker.get_stats();
		assert_eq!(stats.malformed_batches, 1);
		assert_eq!(stats.vouchers_fetched, 0);
		assert_eq!(stats.summary(), "0 vouchers in 1 request (1 malformed)");
	}
}
