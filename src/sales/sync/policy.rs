//! Fetch policy and the reference constants it defaults to.
//!
//! The policy is chosen by the caller and injected into the fetcher at construction time;
//! the engine never tries to detect what kind of network it is running on.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Days per chunk when a range has to be sliced on the client.
pub const DEFAULT_CHUNK_DAYS: u32 = 5;
/// Request timeout on a regular connection.
pub const DESKTOP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Request timeout on a constrained or mobile connection.
pub const MOBILE_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
/// Attempts for the initial unchunked probe.
pub const PROBE_ATTEMPTS: u32 = 2;
/// Attempts for each chunk request.
pub const CHUNK_ATTEMPTS: u32 = 3;
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(5);
/// How long the terminal progress of a settled sync stays observable.
pub const SETTLE_GRACE: Duration = Duration::from_secs(1);

/// Network environment the caller is running in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProfile {
	#[default]
	Desktop,
	Mobile,
}

impl std::fmt::Display for NetworkProfile {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			NetworkProfile::Desktop => write!(f, "desktop"),
			NetworkProfile::Mobile => write!(f, "mobile"),
		}
	}
}

impl std::str::FromStr for NetworkProfile {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"desktop" => Ok(NetworkProfile::Desktop),
			"mobile" => Ok(NetworkProfile::Mobile),
			other => Err(format!("unknown network profile '{}'", other)),
		}
	}
}

/// Timeout, retry and chunking parameters for one fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
	pub profile: NetworkProfile,
	pub request_timeout: Duration,
	pub probe_attempts: u32,
	pub chunk_attempts: u32,
	pub backoff_initial: Duration,
	pub backoff_max: Duration,
	pub chunk_days: u32,
}

impl FetchPolicy {
	pub fn for_profile(profile: NetworkProfile) -> Self {
		let request_timeout = match profile {
			NetworkProfile::Desktop => DESKTOP_REQUEST_TIMEOUT,
			NetworkProfile::Mobile => MOBILE_REQUEST_TIMEOUT,
		};

		Self {
			profile,
			request_timeout,
			probe_attempts: PROBE_ATTEMPTS,
			chunk_attempts: CHUNK_ATTEMPTS,
			backoff_initial: BACKOFF_INITIAL,
			backoff_max: BACKOFF_MAX,
			chunk_days: DEFAULT_CHUNK_DAYS,
		}
	}

	/// Deterministic exponential schedule: 1s, 2s, 4s, then capped.
	///
	/// Attempt limits are enforced by the retry wrapper, so the schedule itself never ends.
	pub fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.backoff_initial)
			.with_randomization_factor(0.0)
			.with_multiplier(2.0)
			.with_max_interval(self.backoff_max)
			.with_max_elapsed_time(None)
			.build()
	}
}

impl Default for FetchPolicy {
	fn default() -> Self {
		Self::for_profile(NetworkProfile::default())
	}
}
