//! Runner settings read from `LEDGER_*` environment variables.

use crate::sales::TenantContext;
use crate::sales::sync::{CoordinatorConfig, FetchPolicy, NetworkProfile, SyncWindow};
use crate::utils::parse_wire_date;

use chrono::{NaiveDate, Utc};
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "http://localhost:9000/api/tally";
const DEFAULT_CACHE_DIR: &str = "data/sales";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("{0} is not set")]
	Missing(&'static str),

	#[error("{name} has an invalid value '{value}': {reason}")]
	Invalid {
		name: &'static str,
		value: String,
		reason: String,
	},
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	pub api_url: String,
	pub auth_token: Option<String>,
	pub cache_dir: PathBuf,
	pub profile: NetworkProfile,
	pub tenant: TenantContext,
	pub window: SyncWindow,
}

impl Settings {
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Build settings from any variable source.
	///
	/// `LEDGER_TALLYLOC_ID`, `LEDGER_GUID` and `LEDGER_FROM` are required. `LEDGER_TO` defaults
	/// to today and `LEDGER_BOOKS_FROM` to `LEDGER_FROM`.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let var = |name: &str| {
			lookup(name)
				.map(|v| v.trim().to_string())
				.filter(|v| !v.is_empty())
		};

		let api_url = var("LEDGER_API_URL")
			.map(|v| v.trim_end_matches('/').to_string())
			.unwrap_or_else(|| DEFAULT_API_URL.to_string());
		let cache_dir = var("LEDGER_CACHE_DIR")
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

		let profile = match var("LEDGER_NETWORK_PROFILE") {
			Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
				name: "LEDGER_NETWORK_PROFILE",
				value,
				reason,
			})?,
			None => NetworkProfile::default(),
		};

		let tallyloc_raw = var("LEDGER_TALLYLOC_ID").ok_or(ConfigError::Missing("LEDGER_TALLYLOC_ID"))?;
		let tallyloc_id = tallyloc_raw.parse::<i64>().map_err(|e| ConfigError::Invalid {
			name: "LEDGER_TALLYLOC_ID",
			value: tallyloc_raw.clone(),
			reason: e.to_string(),
		})?;
		let guid = var("LEDGER_GUID").ok_or(ConfigError::Missing("LEDGER_GUID"))?;
		let company = var("LEDGER_COMPANY").unwrap_or_else(|| guid.clone());

		let date = |name: &'static str| -> Result<Option<NaiveDate>, ConfigError> {
			var(name)
				.map(|value| {
					parse_wire_date(&value).map_err(|e| ConfigError::Invalid {
						name,
						value,
						reason: e.to_string(),
					})
				})
				.transpose()
		};
		let from = date("LEDGER_FROM")?.ok_or(ConfigError::Missing("LEDGER_FROM"))?;
		let to = date("LEDGER_TO")?.unwrap_or_else(|| Utc::now().date_naive());
		let books_from = date("LEDGER_BOOKS_FROM")?.unwrap_or(from);

		Ok(Self {
			api_url,
			auth_token: var("LEDGER_AUTH_TOKEN"),
			cache_dir,
			profile,
			tenant: TenantContext::new(tallyloc_id, company, guid),
			window: SyncWindow { from, to, books_from },
		})
	}

	pub fn fetch_policy(&self) -> FetchPolicy {
		FetchPolicy::for_profile(self.profile)
	}

	pub fn coordinator_config(&self) -> CoordinatorConfig {
		CoordinatorConfig::default()
	}
}
