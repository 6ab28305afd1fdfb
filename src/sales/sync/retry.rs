//! Timeout and bounded retry around a single extract call.

use crate::ledger::LedgerError;
use crate::sales::sync::policy::FetchPolicy;
use crate::sales::{Connectivity, SalesSyncError};

use backoff::future::retry_notify;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `operation` with the policy's per-attempt timeout, retrying transient failures.
///
/// Each attempt is raced against the timeout and the cancellation token. Only timeouts and
/// transient network failures are retried, with the policy's exponential backoff in between.
/// Any other failure is returned immediately as [`SalesSyncError::Ledger`]; running out of
/// attempts on transient failures yields [`SalesSyncError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(
	policy: &FetchPolicy,
	max_attempts: u32,
	label: &str,
	cancel: &CancellationToken,
	mut operation: F,
) -> Result<T, SalesSyncError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, LedgerError>>,
{
	let max_attempts = max_attempts.max(1);
	let timeout = policy.request_timeout;
	let attempts = AtomicU32::new(0);
	let cancelled = AtomicBool::new(false);

	let result = retry_notify(
		policy.backoff(),
		|| {
			let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
			let call = operation();
			let cancelled = &cancelled;
			async move {
				debug!("{}: attempt {}/{}", label, attempt, max_attempts);
				let outcome = tokio::select! {
					biased;
					_ = cancel.cancelled() => {
						cancelled.store(true, Ordering::SeqCst);
						return Err(backoff::Error::permanent(LedgerError::InvalidRequest(
							"cancelled".to_string(),
						)));
					}
					outcome = tokio::time::timeout(timeout, call) => outcome,
				};

				let err = match outcome {
					Ok(Ok(value)) => return Ok(value),
					Ok(Err(e)) => e,
					Err(_) => LedgerError::Timeout(timeout),
				};

				if err.is_transient() && attempt < max_attempts {
					Err(backoff::Error::transient(err))
				} else {
					Err(backoff::Error::permanent(err))
				}
			}
		},
		|err: LedgerError, wait: Duration| {
			warn!(
				"{}: attempt {} failed ({}), retrying in {:?}",
				label,
				attempts.load(Ordering::SeqCst),
				err,
				wait
			);
		},
	)
	.await;

	if cancelled.load(Ordering::SeqCst) {
		return Err(SalesSyncError::Cancelled);
	}

	result.map_err(|last_error| {
		let attempts = attempts.load(Ordering::SeqCst);
		if last_error.is_transient() {
			let connectivity = if last_error.is_connectivity_failure() {
				Connectivity::Offline
			} else {
				Connectivity::Online
			};
			SalesSyncError::RetriesExhausted {
				attempts,
				last_error,
				connectivity,
				profile: policy.profile,
			}
		} else {
			SalesSyncError::Ledger(last_error)
		}
	})
}
