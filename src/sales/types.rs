use crate::ledger::{LedgerError, VoucherRecord};
use crate::sales::sync::policy::NetworkProfile;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Organization and location a sync is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
	pub tallyloc_id: i64,
	pub company: String,
	pub guid: String,
}

impl TenantContext {
	pub fn new(tallyloc_id: i64, company: impl Into<String>, guid: impl Into<String>) -> Self {
		Self {
			tallyloc_id,
			company: company.into(),
			guid: guid.into(),
		}
	}

	/// Location id and guid identify a company; the display name does not.
	pub fn is_same_company(&self, other: &TenantContext) -> bool {
		self.tallyloc_id == other.tallyloc_id && self.guid == other.guid
	}

	/// Stable key for per-tenant storage.
	pub fn cache_key(&self) -> String {
		format!("{}_{}", self.tallyloc_id, self.guid)
	}
}

impl std::fmt::Display for TenantContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({}/{})", self.company, self.tallyloc_id, self.guid)
	}
}

/// Snapshot of sync progress handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
	pub current: usize,
	pub total: usize,
	pub message: String,
}

impl Progress {
	pub fn new(current: usize, total: usize, message: impl Into<String>) -> Self {
		Self {
			current,
			total,
			message: message.into(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.current == 0 && self.total == 0 && self.message.is_empty()
	}
}

/// Metadata persisted next to a tenant's voucher snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
	pub books_from: NaiveDate,
	pub last_alter_id: Option<i64>,
}

/// Voucher set as stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesSnapshot {
	pub vouchers: Vec<VoucherRecord>,
}

/// Full or incremental, decided by whether a high-water mark exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
	Full,
	Incremental,
}

/// Where the stored voucher set came from after a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
	/// Fetched data replaced the cache (full sync).
	Replaced,
	/// Fetched data was merged into the existing cache.
	Merged,
	/// The fetch was unusable and the previous snapshot was kept.
	ReusedCache,
}

/// Result reported to every caller awaiting a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
	/// False when no fetched data was absorbed because the previous snapshot was reused.
	pub success: bool,
	/// Number of vouchers stored after the sync.
	pub count: usize,
	pub last_alter_id: Option<i64>,
	/// Fetched vouchers that were not already present.
	pub new_records: usize,
	pub mode: SyncMode,
	pub source: SnapshotSource,
	/// Number of extract calls that produced data (1 when unchunked).
	pub chunks: usize,
}

/// Hint attached to exhausted retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
	Online,
	Offline,
}

impl std::fmt::Display for Connectivity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Connectivity::Online => write!(f, "online"),
			Connectivity::Offline => write!(f, "offline"),
		}
	}
}

/// Errors surfaced by the sales sync engine
#[derive(Debug, thiserror::Error)]
pub enum SalesSyncError {
	#[error("Ledger request failed: {0}")]
	Ledger(#[from] LedgerError),

	#[error(
		"Request failed after {attempts} attempts ({connectivity}, {profile}): {last_error}"
	)]
	RetriesExhausted {
		attempts: u32,
		last_error: LedgerError,
		connectivity: Connectivity,
		profile: NetworkProfile,
	},

	#[error("Data integrity error: {0}")]
	DataIntegrity(String),

	#[error("Cache error: {0}")]
	Cache(String),

	#[error("Invalid date range: {0}")]
	InvalidRange(String),

	#[error("Sync cancelled")]
	Cancelled,

	#[error("Sync task aborted: {0}")]
	Aborted(String),
}

impl SalesSyncError {
	/// Whether this failure should push a full fetch into chunked mode.
	pub fn suggests_chunking(&self) -> bool {
		match self {
			Self::Ledger(e) => e.suggests_chunking(),
			Self::RetriesExhausted { last_error, .. } => last_error.suggests_chunking(),
			_ => false,
		}
	}
}

impl From<std::io::Error> for SalesSyncError {
	fn from(e: std::io::Error) -> Self {
		Self::Cache(e.to_string())
	}
}

impl From<serde_json::Error> for SalesSyncError {
	fn from(e: serde_json::Error) -> Self {
		Self::Cache(format!("snapshot serialization failed: {}", e))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_company_ignores_display_name() {
		let a = TenantContext::new(7, "Acme Traders", "guid-1");
		let renamed = TenantContext::new(7, "Acme Traders Pvt Ltd", "guid-1");
		let other_location = TenantContext::new(8, "Acme Traders", "guid-1");

		assert!(a.is_same_company(&renamed));
		assert!(!a.is_same_company(&other_location));
		assert_eq!(a.cache_key(), "7_guid-1");
	}

	#[test]
	fn exhausted_error_message_carries_diagnostics() {
		let err = SalesSyncError::RetriesExhausted {
			attempts: 3,
			last_error: LedgerError::Timeout(std::time::Duration::from_secs(90)),
			connectivity: Connectivity::Online,
			profile: NetworkProfile::Mobile,
		};
		let message = err.to_string();
		assert!(message.contains("3 attempts"));
		assert!(message.contains("online"));
		assert!(message.contains("mobile"));
		assert!(err.suggests_chunking());
	}
}
