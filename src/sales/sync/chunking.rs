//! Date range tiling for client-side slicing.

use crate::sales::SalesSyncError;
use crate::utils::format_span;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Inclusive sub-range of a requested date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateChunk {
	pub start: NaiveDate,
	pub end: NaiveDate,
}

impl DateChunk {
	pub fn days(&self) -> i64 {
		(self.end - self.start).num_days() + 1
	}

	pub fn label(&self) -> String {
		format_span(self.start, self.end)
	}
}

/// Split `[start, end]` into windows of `chunk_days` days.
///
/// Chunks are returned in date order, are contiguous and non-overlapping, and their union is
/// exactly the requested range. Only the last chunk may be shorter than `chunk_days`.
pub fn split_date_range(
	start: NaiveDate,
	end: NaiveDate,
	chunk_days: u32,
) -> Result<Vec<DateChunk>, SalesSyncError> {
	if chunk_days == 0 {
		return Err(SalesSyncError::InvalidRange(
			"chunk size must be at least one day".to_string(),
		));
	}
	if start > end {
		return Err(SalesSyncError::InvalidRange(format!(
			"start {} is after end {}",
			start, end
		)));
	}

	let step = Duration::days(i64::from(chunk_days));
	let mut chunks = Vec::new();
	let mut cursor = start;

	loop {
		let chunk_end = match cursor.checked_add_signed(step - Duration::days(1)) {
			Some(candidate) if candidate < end => candidate,
			_ => end,
		};
		chunks.push(DateChunk {
			start: cursor,
			end: chunk_end,
		});

		if chunk_end >= end {
			break;
		}
		cursor = match chunk_end.succ_opt() {
			Some(next) => next,
			None => break,
		};
	}

	Ok(chunks)
}
