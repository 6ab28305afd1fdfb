//! Types for the remote ledger extract endpoint and voucher normalization.
//!
//! The remote system returns vouchers with identity and amount fields spelled in several
//! casing conventions, and numbers that sometimes arrive as strings. Everything is mapped
//! into the canonical [`VoucherRecord`] at this boundary; the rest of the crate never looks
//! at raw wire names.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Whether the remote side should slice the requested range on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerSlice {
	Yes,
	No,
}

/// Body of `POST /extract`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRequest {
	pub tallyloc_id: i64,
	pub company: String,
	pub guid: String,
	/// Inclusive start date, `YYYYMMDD`.
	pub fromdate: String,
	/// Inclusive end date, `YYYYMMDD`.
	pub todate: String,
	pub serverslice: ServerSlice,
	/// High-water mark for incremental extraction.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub lastaltid: Option<i64>,
}

/// Successful response of `POST /extract`.
///
/// `vouchers` is kept as an untyped value on purpose: a response that "succeeds" without a
/// voucher array is a data integrity problem the engine has to see, not a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractResponse {
	#[serde(default)]
	pub vouchers: Option<Value>,
	/// Usually `"Yes"`, but booleans and numbers are seen too.
	#[serde(default)]
	pub frontendslice: Option<Value>,
	#[serde(default)]
	pub message: Option<Value>,
}

impl ExtractResponse {
	/// True when the server asks the caller to split the range into smaller windows.
	pub fn requests_frontend_slice(&self) -> bool {
		let flagged = match &self.frontendslice {
			Some(Value::Bool(flag)) => *flag,
			Some(Value::String(flag)) => matches!(
				flag.trim().to_ascii_lowercase().as_str(),
				"yes" | "y" | "true" | "1"
			),
			Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
			_ => false,
		};
		let hinted = match &self.message {
			None | Some(Value::Null) => false,
			Some(Value::String(message)) => message.to_ascii_lowercase().contains("slice"),
			Some(other) => other.to_string().to_ascii_lowercase().contains("slice"),
		};
		flagged || hinted
	}

	/// Normalize the voucher array.
	///
	/// Returns `None` when the field is missing or not an array. Individual entries that are
	/// not objects are dropped with a warning.
	pub fn voucher_records(&self) -> Option<Vec<VoucherRecord>> {
		let Some(Value::Array(items)) = &self.vouchers else {
			return None;
		};

		let mut records = Vec::with_capacity(items.len());
		for item in items {
			match serde_json::from_value::<VoucherRecord>(item.clone()) {
				Ok(record) => records.push(record),
				Err(e) => tracing::warn!("Skipping malformed voucher entry: {}", e),
			}
		}
		Some(records)
	}
}

/// One ledger transaction in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherRecord {
	#[serde(
		default,
		alias = "masterid",
		alias = "MASTERID",
		alias = "master_id",
		deserialize_with = "lenient_string"
	)]
	pub master_id: Option<String>,
	#[serde(
		default,
		alias = "alterid",
		alias = "ALTERID",
		alias = "alter_id",
		deserialize_with = "lenient_i64"
	)]
	pub alter_id: Option<i64>,
	#[serde(
		default,
		alias = "vouchernumber",
		alias = "VOUCHERNUMBER",
		alias = "voucher_number",
		alias = "vchno",
		deserialize_with = "lenient_string"
	)]
	pub voucher_number: Option<String>,
	#[serde(
		default,
		alias = "DATE",
		alias = "cp_date",
		deserialize_with = "lenient_string"
	)]
	pub date: Option<String>,
	#[serde(
		default,
		alias = "debitamt",
		alias = "DEBITAMT",
		alias = "debit_amount",
		deserialize_with = "lenient_f64"
	)]
	pub debit_amount: f64,
	#[serde(
		default,
		alias = "creditamt",
		alias = "CREDITAMT",
		alias = "credit_amount",
		deserialize_with = "lenient_f64"
	)]
	pub credit_amount: f64,
	#[serde(default, alias = "AMOUNT", deserialize_with = "lenient_f64")]
	pub amount: f64,
	#[serde(
		default,
		alias = "particulars",
		alias = "PARTICULARS",
		alias = "partyledgername",
		alias = "PARTYLEDGERNAME",
		deserialize_with = "lenient_string"
	)]
	pub party: Option<String>,
	#[serde(
		default,
		alias = "vouchertypename",
		alias = "VOUCHERTYPENAME",
		alias = "vchtype",
		deserialize_with = "lenient_string"
	)]
	pub voucher_type: Option<String>,
	#[serde(
		default,
		alias = "ledgerentries",
		alias = "LEDGERENTRIES",
		alias = "ledger_entries",
		deserialize_with = "lenient_vec"
	)]
	pub ledger_entries: Vec<LedgerEntry>,
	#[serde(
		default,
		alias = "allinventoryentries",
		alias = "ALLINVENTORYENTRIES",
		alias = "inventory_entries",
		deserialize_with = "lenient_vec"
	)]
	pub inventory_entries: Vec<InventoryEntry>,
	/// Fields the engine does not interpret, preserved as received.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Ledger allocation line of a voucher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
	#[serde(
		default,
		alias = "ledgername",
		alias = "LEDGERNAME",
		deserialize_with = "lenient_string"
	)]
	pub ledger_name: Option<String>,
	#[serde(default, alias = "AMOUNT", deserialize_with = "lenient_f64")]
	pub amount: f64,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Inventory allocation line of a voucher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
	#[serde(
		default,
		alias = "stockitemname",
		alias = "STOCKITEMNAME",
		deserialize_with = "lenient_string"
	)]
	pub stock_item_name: Option<String>,
	#[serde(
		default,
		alias = "billedqty",
		alias = "BILLEDQTY",
		deserialize_with = "lenient_string"
	)]
	pub billed_qty: Option<String>,
	#[serde(default, alias = "AMOUNT", deserialize_with = "lenient_f64")]
	pub amount: f64,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Allocation line type that can hold a value it could not interpret.
trait AllocationLine: DeserializeOwned {
	fn from_raw(value: Value) -> Self;
}

impl AllocationLine for LedgerEntry {
	fn from_raw(value: Value) -> Self {
		Self {
			ledger_name: None,
			amount: 0.0,
			extra: Map::from_iter([("raw".to_string(), value)]),
		}
	}
}

impl AllocationLine for InventoryEntry {
	fn from_raw(value: Value) -> Self {
		Self {
			stock_item_name: None,
			billed_qty: None,
			amount: 0.0,
			extra: Map::from_iter([("raw".to_string(), value)]),
		}
	}
}

/// Allocation lists arrive as arrays, single objects or `null`.
///
/// Values that are not objects are kept under `raw` in a line of their own, so the voucher is
/// never rejected because of its allocations.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
	D: Deserializer<'de>,
	T: AllocationLine,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(match value {
		None | Some(Value::Null) => Vec::new(),
		Some(Value::Array(items)) => items
			.into_iter()
			.filter(|item| !item.is_null())
			.map(allocation_line)
			.collect(),
		Some(other) => vec![allocation_line(other)],
	})
}

fn allocation_line<T: AllocationLine>(value: Value) -> T {
	match serde_json::from_value::<T>(value.clone()) {
		Ok(line) => line,
		Err(_) => T::from_raw(value),
	}
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(match value {
		Some(Value::String(s)) => {
			let trimmed = s.trim();
			(!trimmed.is_empty()).then(|| trimmed.to_string())
		}
		Some(Value::Number(n)) => Some(n.to_string()),
		Some(Value::Bool(b)) => Some(b.to_string()),
		_ => None,
	})
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(match value {
		Some(Value::Number(n)) => n
			.as_i64()
			.or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
		Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
		_ => None,
	})
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(match value {
		Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
		// Amounts are often formatted with thousands separators.
		Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().unwrap_or_default(),
		_ => 0.0,
	})
}

/// Error types for the remote ledger boundary.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Request timed out after {0:?}")]
	Timeout(Duration),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("HTTP status {status}: {body}")]
	Status { status: u16, body: String },

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid request: {0}")]
	InvalidRequest(String),
}

impl LedgerError {
	/// Timeout and transient network failures, including gateway/timeout statuses.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Timeout(_) => true,
			Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
			Self::Status { status, .. } => matches!(*status, 408 | 429 | 502 | 503 | 504),
			Self::Json(_) | Self::InvalidRequest(_) => false,
		}
	}

	/// Failures that indicate the range is too heavy for a single request.
	pub fn suggests_chunking(&self) -> bool {
		self.is_transient() || matches!(self, Self::Status { status, .. } if (500..=599).contains(status))
	}

	/// Whether the failure looks like the client has no route to the server at all.
	pub fn is_connectivity_failure(&self) -> bool {
		matches!(self, Self::Http(e) if e.is_connect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn voucher_fields_are_normalized_across_casings() {
		let response = ExtractResponse {
			vouchers: Some(json!([
				{
					"MASTERID": 42,
					"ALTERID": "517",
					"VOUCHERNUMBER": "S/001",
					"DATE": "20240401",
					"DEBITAMT": "1,250.50",
					"PARTYLEDGERNAME": "Acme Traders",
					"VOUCHERTYPENAME": "Sales",
					"LEDGERENTRIES": [{ "LEDGERNAME": "Sales A/c", "AMOUNT": -1250.5 }],
					"ALLINVENTORYENTRIES": [{ "STOCKITEMNAME": "Widget", "BILLEDQTY": "5 nos", "AMOUNT": "1250.5" }],
					"narration": "first order"
				},
				{ "masterId": "43", "alterId": 518, "voucherNumber": "S/002", "date": "20240402" }
			])),
			..Default::default()
		};

		let records = response.voucher_records().unwrap();
		assert_eq!(records.len(), 2);

		let first = &records[0];
		assert_eq!(first.master_id.as_deref(), Some("42"));
		assert_eq!(first.alter_id, Some(517));
		assert_eq!(first.voucher_number.as_deref(), Some("S/001"));
		assert_eq!(first.debit_amount, 1250.5);
		assert_eq!(first.party.as_deref(), Some("Acme Traders"));
		assert_eq!(first.ledger_entries[0].ledger_name.as_deref(), Some("Sales A/c"));
		assert_eq!(first.inventory_entries[0].amount, 1250.5);
		assert_eq!(first.extra.get("narration"), Some(&json!("first order")));

		assert_eq!(records[1].master_id.as_deref(), Some("43"));
		assert_eq!(records[1].alter_id, Some(518));
	}

	#[test]
	fn irregular_allocation_shapes_keep_the_voucher() {
		let response = ExtractResponse {
			vouchers: Some(json!([
				{ "masterid": "1", "alterid": 11, "ledgerentries": null },
				{ "masterid": "2", "alterid": 12, "allinventoryentries": { "stockitemname": "Widget", "amount": "40" } },
				{ "masterid": "3", "alterid": 13, "LEDGERENTRIES": "see attachment", "ALLINVENTORYENTRIES": [null, 7] },
				{ "masterid": "4", "alterid": 14 }
			])),
			..Default::default()
		};

		let records = response.voucher_records().unwrap();
		let ids: Vec<Option<&str>> = records.iter().map(|r| r.master_id.as_deref()).collect();
		assert_eq!(ids, vec![Some("1"), Some("2"), Some("3"), Some("4")]);

		assert!(records[0].ledger_entries.is_empty());
		assert_eq!(records[1].inventory_entries.len(), 1);
		assert_eq!(records[1].inventory_entries[0].stock_item_name.as_deref(), Some("Widget"));
		assert_eq!(records[1].inventory_entries[0].amount, 40.0);
		assert_eq!(records[2].ledger_entries[0].extra.get("raw"), Some(&json!("see attachment")));
		assert_eq!(records[2].inventory_entries.len(), 1);
		assert_eq!(records[2].inventory_entries[0].extra.get("raw"), Some(&json!(7)));

		// Cached form reloads to the same record.
		let cached = serde_json::to_value(&records[2]).unwrap();
		let reloaded: VoucherRecord = serde_json::from_value(cached).unwrap();
		assert_eq!(reloaded, records[2]);
	}

	#[test]
	fn non_numeric_alter_id_is_treated_as_absent() {
		let record: VoucherRecord =
			serde_json::from_value(json!({ "masterid": "7", "alterid": "n/a" })).unwrap();
		assert_eq!(record.alter_id, None);
		assert_eq!(record.master_id.as_deref(), Some("7"));
	}

	#[test]
	fn missing_or_non_array_vouchers_is_not_a_batch() {
		let missing = ExtractResponse::default();
		assert!(missing.voucher_records().is_none());

		let wrong_shape = ExtractResponse {
			vouchers: Some(json!({ "count": 3 })),
			..Default::default()
		};
		assert!(wrong_shape.voucher_records().is_none());
	}

	#[test]
	fn slice_hint_is_detected_from_flag_or_message() {
		let flagged: ExtractResponse =
			serde_json::from_value(json!({ "vouchers": [], "frontendslice": "Yes" })).unwrap();
		assert!(flagged.requests_frontend_slice());

		let hinted: ExtractResponse = serde_json::from_value(
			json!({ "message": "Range too large, please Slice on the client" }),
		)
		.unwrap();
		assert!(hinted.requests_frontend_slice());

		let plain: ExtractResponse = serde_json::from_value(json!({ "vouchers": [] })).unwrap();
		assert!(!plain.requests_frontend_slice());
	}

	#[test]
	fn non_string_slice_hints_still_decode() {
		let boolean: ExtractResponse =
			serde_json::from_value(json!({ "vouchers": [], "frontendslice": true })).unwrap();
		assert!(boolean.requests_frontend_slice());

		let numeric: ExtractResponse =
			serde_json::from_value(json!({ "frontendslice": 1, "message": 413 })).unwrap();
		assert!(numeric.requests_frontend_slice());

		let structured: ExtractResponse =
			serde_json::from_value(json!({ "frontendslice": false, "message": { "hint": "use frontend slice" } }))
				.unwrap();
		assert!(structured.requests_frontend_slice());

		let declined: ExtractResponse =
			serde_json::from_value(json!({ "vouchers": [], "frontendslice": false, "message": { "code": 0 } }))
				.unwrap();
		assert!(!declined.requests_frontend_slice());
		assert_eq!(declined.voucher_records(), Some(Vec::new()));
	}

	#[test]
	fn error_classification_matches_retry_policy() {
		let gateway = LedgerError::Status {
			status: 504,
			body: "gateway timeout".to_string(),
		};
		assert!(gateway.is_transient());
		assert!(gateway.suggests_chunking());

		let internal = LedgerError::Status {
			status: 500,
			body: "boom".to_string(),
		};
		assert!(!internal.is_transient());
		assert!(internal.suggests_chunking());

		let bad_request = LedgerError::Status {
			status: 400,
			body: "bad guid".to_string(),
		};
		assert!(!bad_request.is_transient());
		assert!(!bad_request.suggests_chunking());

		assert!(LedgerError::Timeout(Duration::from_secs(60)).is_transient());
	}

	#[test]
	fn lastaltid_is_omitted_for_full_requests() {
		let request = ExtractRequest {
			tallyloc_id: 3,
			company: "Acme".to_string(),
			guid: "g-1".to_string(),
			fromdate: "20240401".to_string(),
			todate: "20240430".to_string(),
			serverslice: ServerSlice::No,
			lastaltid: None,
		};
		let body = serde_json::to_value(&request).unwrap();
		assert!(body.get("lastaltid").is_none());
		assert_eq!(body["serverslice"], json!("No"));
	}
}
