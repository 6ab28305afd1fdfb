//! Deduplicating merge of fetched vouchers into the cached snapshot.
//!
//! Identity is a derived [`CompositeKey`]; the merge never edits a record, it only decides
//! which copies survive. The high-water mark is recomputed from the final set.

use crate::ledger::VoucherRecord;
use crate::sales::{SalesSyncError, SyncMode};

use std::collections::HashSet;
use tracing::{info, warn};

/// Derived identity of a voucher used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompositeKey {
	MasterAlter { master_id: String, alter_id: i64 },
	NumberDate { voucher_number: String, date: String },
	Master { master_id: String },
	/// Weakest identity, used only when nothing better exists.
	///
	/// Two distinct vouchers sharing number (or date) and amount collide here. The tuple is
	/// fixed and hashed field by field, so it does not depend on serialization order.
	Structural {
		voucher_number: Option<String>,
		date: Option<String>,
		amount_millis: i64,
	},
}

impl CompositeKey {
	/// Derive the key using the first rule that applies.
	pub fn of(record: &VoucherRecord) -> Self {
		match (
			&record.master_id,
			record.alter_id,
			&record.voucher_number,
			&record.date,
		) {
			(Some(master_id), Some(alter_id), _, _) => CompositeKey::MasterAlter {
				master_id: master_id.clone(),
				alter_id,
			},
			(_, _, Some(voucher_number), Some(date)) => CompositeKey::NumberDate {
				voucher_number: voucher_number.clone(),
				date: date.clone(),
			},
			(Some(master_id), _, _, _) => CompositeKey::Master {
				master_id: master_id.clone(),
			},
			_ => CompositeKey::Structural {
				voucher_number: record.voucher_number.clone(),
				date: record.date.clone(),
				amount_millis: (record.amount * 1000.0).round() as i64,
			},
		}
	}

	pub fn is_structural(&self) -> bool {
		matches!(self, CompositeKey::Structural { .. })
	}
}

/// Outcome of folding fetched vouchers into the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeResult {
	/// A new voucher set to persist.
	Updated {
		vouchers: Vec<VoucherRecord>,
		existing: usize,
		new_unique: usize,
		last_alter_id: Option<i64>,
	},
	/// The fetch was unusable; the previous snapshot stays as it is.
	KeepExisting {
		count: usize,
		last_alter_id: Option<i64>,
	},
}

impl MergeResult {
	pub fn count(&self) -> usize {
		match self {
			MergeResult::Updated { vouchers, .. } => vouchers.len(),
			MergeResult::KeepExisting { count, .. } => *count,
		}
	}

	pub fn last_alter_id(&self) -> Option<i64> {
		match self {
			MergeResult::Updated { last_alter_id, .. } | MergeResult::KeepExisting { last_alter_id, .. } => {
				*last_alter_id
			}
		}
	}
}

/// Fetched data handed to the merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedBatch {
	pub vouchers: Vec<VoucherRecord>,
	/// False when any extract call answered without a usable voucher array.
	pub well_formed: bool,
}

/// Stateless merge rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
	pub fn new() -> Self {
		Self
	}

	/// Merge `fetched` into `existing` according to `mode`.
	///
	/// Full syncs are authoritative and replace the cache. Incremental syncs append only
	/// vouchers whose key is not already cached. An incremental sync that fetched nothing
	/// usable keeps the previous snapshot, and fails if there is none, so a non-empty cache is
	/// never replaced by an empty one. A malformed full fetch is treated the same way.
	pub fn merge(
		&self,
		mode: SyncMode,
		existing: Option<Vec<VoucherRecord>>,
		fetched: FetchedBatch,
	) -> Result<MergeResult, SalesSyncError> {
		let existing = existing.unwrap_or_default();
		let unusable = match mode {
			SyncMode::Full => !fetched.well_formed,
			SyncMode::Incremental => !fetched.well_formed || fetched.vouchers.is_empty(),
		};

		if unusable {
			if existing.is_empty() {
				return Err(SalesSyncError::DataIntegrity(format!(
					"{:?} sync returned no usable vouchers and there is no cached snapshot to fall back to",
					mode
				)));
			}
			warn!(
				"{:?} sync returned no usable vouchers, keeping cached snapshot of {}",
				mode,
				existing.len()
			);
			return Ok(MergeResult::KeepExisting {
				count: existing.len(),
				last_alter_id: highest_alter_id(&existing),
			});
		}

		let fetched = dedup_batch(fetched.vouchers);

		let (existing_count, new_unique, vouchers) = match mode {
			SyncMode::Full => {
				let count = fetched.len();
				(existing.len(), count, fetched)
			}
			SyncMode::Incremental if existing.is_empty() => {
				let count = fetched.len();
				(0, count, fetched)
			}
			SyncMode::Incremental => {
				let known: HashSet<CompositeKey> = existing.iter().map(CompositeKey::of).collect();
				let fresh: Vec<VoucherRecord> = fetched
					.into_iter()
					.filter(|record| !known.contains(&CompositeKey::of(record)))
					.collect();
				let new_unique = fresh.len();
				let existing_count = existing.len();
				let mut merged = existing;
				merged.extend(fresh);
				(existing_count, new_unique, merged)
			}
		};

		info!(
			"Merged {:?} sync: {} existing, {} new unique, {} total",
			mode,
			existing_count,
			new_unique,
			vouchers.len()
		);

		let last_alter_id = highest_alter_id(&vouchers);
		Ok(MergeResult::Updated {
			vouchers,
			existing: existing_count,
			new_unique,
			last_alter_id,
		})
	}
}

/// Drop repeated keys within one batch, keeping the first occurrence.
fn dedup_batch(vouchers: Vec<VoucherRecord>) -> Vec<VoucherRecord> {
	let mut seen = HashSet::with_capacity(vouchers.len());
	let before = vouchers.len();
	let unique: Vec<VoucherRecord> = vouchers
		.into_iter()
		.filter(|record| seen.insert(CompositeKey::of(record)))
		.collect();
	if unique.len() != before {
		warn!(
			"Dropped {} duplicate vouchers within fetched batch",
			before - unique.len()
		);
	}
	unique
}

/// Maximum alteration id across `vouchers`, ignoring records without one.
pub fn highest_alter_id(vouchers: &[VoucherRecord]) -> Option<i64> {
	vouchers.iter().filter_map(|record| record.alter_id).max()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::{Map, json};

	fn voucher(master: u32, alter: Option<i64>) -> VoucherRecord {
		VoucherRecord {
			master_id: Some(master.to_string()),
			alter_id: alter,
			voucher_number: Some(format!("S/{}", master)),
			date: Some("20240401".to_string()),
			debit_amount: 0.0,
			credit_amount: 0.0,
			amount: 100.0,
			party: None,
			voucher_type: Some("Sales".to_string()),
			ledger_entries: Vec::new(),
			inventory_entries: Vec::new(),
			extra: Map::new(),
		}
	}

	fn bare(number: Option<&str>, date: Option<&str>, amount: f64) -> VoucherRecord {
		VoucherRecord {
			master_id: None,
			alter_id: None,
			voucher_number: number.map(str::to_string),
			date: date.map(str::to_string),
			amount,
			..voucher(0, None)
		}
	}

	fn batch(vouchers: Vec<VoucherRecord>) -> FetchedBatch {
		FetchedBatch {
			vouchers,
			well_formed: true,
		}
	}

	#[test]
	fn key_precedence_follows_rules() {
		assert!(matches!(
			CompositeKey::of(&voucher(1, Some(10))),
			CompositeKey::MasterAlter { alter_id: 10, .. }
		));
		assert!(matches!(
			CompositeKey::of(&voucher(1, None)),
			CompositeKey::NumberDate { .. }
		));

		let master_only = VoucherRecord {
			voucher_number: None,
			..voucher(5, None)
		};
		assert_eq!(
			CompositeKey::of(&master_only),
			CompositeKey::Master {
				master_id: "5".to_string()
			}
		);

		let structural = CompositeKey::of(&bare(Some("S/9"), None, 12.5));
		assert!(structural.is_structural());
		assert_eq!(structural, CompositeKey::of(&bare(Some("S/9"), None, 12.5)));
		assert_ne!(structural, CompositeKey::of(&bare(Some("S/9"), None, 12.75)));
	}

	#[test]
	fn key_ignores_fields_outside_the_tuple() {
		let mut a = voucher(3, Some(30));
		let mut b = voucher(3, Some(30));
		a.extra.insert("narration".to_string(), json!("x"));
		b.party = Some("Someone".to_string());
		assert_eq!(CompositeKey::of(&a), CompositeKey::of(&b));
	}

	#[test]
	fn incremental_merge_appends_only_unseen_vouchers() {
		let existing: Vec<VoucherRecord> = (1..=100).map(|i| voucher(i, Some(400 + i as i64))).collect();
		assert_eq!(highest_alter_id(&existing), Some(500));

		// 4 repeats of cached vouchers and 8 new ones.
		let mut fetched: Vec<VoucherRecord> = (97..=100).map(|i| voucher(i, Some(400 + i as i64))).collect();
		fetched.extend((101..=108).map(|i| voucher(i, Some(500 + i as i64))));

		let result = MergeEngine::new()
			.merge(SyncMode::Incremental, Some(existing), batch(fetched))
			.unwrap();

		match result {
			MergeResult::Updated {
				vouchers,
				existing,
				new_unique,
				last_alter_id,
			} => {
				assert_eq!(vouchers.len(), 108);
				assert_eq!(existing, 100);
				assert_eq!(new_unique, 8);
				assert_eq!(last_alter_id, Some(608));
			}
			other => panic!("unexpected merge result: {other:?}"),
		}
	}

	#[test]
	fn merging_an_exact_duplicate_does_not_grow() {
		let existing: Vec<VoucherRecord> = (1..=20).map(|i| voucher(i, Some(i as i64))).collect();
		let result = MergeEngine::new()
			.merge(SyncMode::Incremental, Some(existing.clone()), batch(existing))
			.unwrap();
		assert_eq!(result.count(), 20);
		assert_eq!(result.last_alter_id(), Some(20));
	}

	#[test]
	fn incremental_merge_never_shrinks_the_cache() {
		let existing: Vec<VoucherRecord> = (1..=10).map(|i| voucher(i, Some(i as i64))).collect();
		for fetched_len in 0..15u32 {
			let fetched = (5..5 + fetched_len).map(|i| voucher(i, Some(i as i64))).collect();
			let result = MergeEngine::new()
				.merge(SyncMode::Incremental, Some(existing.clone()), batch(fetched))
				.unwrap();
			assert!(result.count() >= existing.len());
			assert_eq!(
				result.last_alter_id(),
				Some(std::cmp::max(10, 4 + fetched_len as i64))
			);
		}
	}

	#[test]
	fn malformed_incremental_fetch_keeps_cached_snapshot() {
		let existing: Vec<VoucherRecord> = (1..=100).map(|i| voucher(i, Some(400 + i as i64))).collect();
		let result = MergeEngine::new()
			.merge(
				SyncMode::Incremental,
				Some(existing),
				FetchedBatch {
					vouchers: Vec::new(),
					well_formed: false,
				},
			)
			.unwrap();
		assert_eq!(
			result,
			MergeResult::KeepExisting {
				count: 100,
				last_alter_id: Some(500)
			}
		);
	}

	#[test]
	fn empty_incremental_fetch_without_cache_fails_loudly() {
		let err = MergeEngine::new()
			.merge(SyncMode::Incremental, None, batch(Vec::new()))
			.unwrap_err();
		assert!(matches!(err, SalesSyncError::DataIntegrity(_)));
	}

	#[test]
	fn full_sync_replaces_cache_and_dedups_batch() {
		let existing: Vec<VoucherRecord> = (1..=50).map(|i| voucher(i, Some(i as i64))).collect();
		let fetched = vec![voucher(1, Some(7)), voucher(2, None), voucher(1, Some(7))];
		let result = MergeEngine::new()
			.merge(SyncMode::Full, Some(existing), batch(fetched))
			.unwrap();
		match result {
			MergeResult::Updated {
				vouchers,
				last_alter_id,
				..
			} => {
				assert_eq!(vouchers.len(), 2);
				assert_eq!(last_alter_id, Some(7));
			}
			other => panic!("unexpected merge result: {other:?}"),
		}
	}

	#[test]
	fn empty_full_sync_is_authoritative() {
		let existing: Vec<VoucherRecord> = (1..=5).map(|i| voucher(i, Some(i as i64))).collect();
		let result = MergeEngine::new()
			.merge(SyncMode::Full, Some(existing), batch(Vec::new()))
			.unwrap();
		assert_eq!(result.count(), 0);
		assert_eq!(result.last_alter_id(), None);
	}

	#[test]
	fn malformed_full_fetch_keeps_cache_or_fails_without_one() {
		let malformed = || FetchedBatch {
			vouchers: vec![voucher(9, Some(90))],
			well_formed: false,
		};

		let existing: Vec<VoucherRecord> = (1..=5).map(|i| voucher(i, Some(i as i64))).collect();
		let result = MergeEngine::new()
			.merge(SyncMode::Full, Some(existing), malformed())
			.unwrap();
		assert_eq!(
			result,
			MergeResult::KeepExisting {
				count: 5,
				last_alter_id: Some(5)
			}
		);

		let err = MergeEngine::new()
			.merge(SyncMode::Full, None, malformed())
			.unwrap_err();
		assert!(matches!(err, SalesSyncError::DataIntegrity(_)));
	}

	#[test]
	fn high_water_mark_ignores_missing_alter_ids() {
		let vouchers = vec![voucher(1, None), voucher(2, Some(3)), voucher(3, None)];
		assert_eq!(highest_alter_id(&vouchers), Some(3));
		assert_eq!(highest_alter_id(&[voucher(1, None)]), None);
		assert_eq!(highest_alter_id(&[]), None);
	}
}
