//! Process-wide single-flight coordination of sales syncs.
//!
//! This module defines the `SyncCoordinator`, which owns the one sync session allowed to exist
//! at a time and broadcasts its progress to subscribers. Callers hand it a tenant and the routine
//! that performs the sync; the coordinator decides whether that routine runs at all:
//!
//! - a call for the tenant that is already syncing joins the running session and receives the
//!   same result,
//! - a call for another tenant waits for the running session to settle, then starts its own,
//! - otherwise a new session is started on its own task.
//!
//! When a session settles its final progress stays readable for a short grace period, after
//! which an empty progress is broadcast. Failures of the routine are handed to every caller
//! unchanged; the session is cleared either way.

use crate::sales::sync::policy::SETTLE_GRACE;
use crate::sales::sync::progress_tracker::ProgressReporter;
use crate::sales::{Progress, SalesSyncError, SyncOutcome, TenantContext};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result every caller of a session observes.
pub type SyncResult = Result<Arc<SyncOutcome>, Arc<SalesSyncError>>;

type SharedSync = Shared<BoxFuture<'static, SyncResult>>;
type Listener = Arc<dyn Fn(&Progress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
	/// How long the final progress of a settled session stays readable.
	pub settle_grace: Duration,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			settle_grace: SETTLE_GRACE,
		}
	}
}

struct Session {
	id: u64,
	tenant: TenantContext,
	progress: Progress,
	result: SharedSync,
	started_at: DateTime<Utc>,
	cancel: CancellationToken,
}

#[derive(Default)]
struct CoordinatorState {
	session: Option<Session>,
	/// Final progress of the last settled session, kept for the grace period.
	settled: Option<(u64, Progress)>,
	next_session_id: u64,
	listeners: HashMap<u64, Listener>,
	next_listener_id: u64,
}

enum Admission {
	Join(SharedSync),
	Wait(TenantContext, SharedSync),
}

/// Single-flight sync coordinator shared by everything that can trigger a sync.
pub struct SyncCoordinator {
	state: Mutex<CoordinatorState>,
	config: CoordinatorConfig,
}

impl SyncCoordinator {
	pub fn new(config: CoordinatorConfig) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(CoordinatorState::default()),
			config,
		})
	}

	fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Register a progress observer.
	///
	/// If a sync is running the observer is called with its current progress straight away.
	pub fn subscribe(self: &Arc<Self>, listener: impl Fn(&Progress) + Send + Sync + 'static) -> Subscription {
		let listener: Listener = Arc::new(listener);
		let (id, current) = {
			let mut state = self.lock_state();
			state.next_listener_id += 1;
			let id = state.next_listener_id;
			state.listeners.insert(id, listener.clone());
			(id, state.session.as_ref().map(|s| s.progress.clone()))
		};
		if let Some(progress) = current {
			listener(&progress);
		}
		Subscription {
			id,
			coordinator: Arc::downgrade(self),
		}
	}

	/// Run `sync_fn` for `tenant` unless a session for the same company is already running.
	///
	/// `sync_fn` is only invoked when this call starts a new session. It receives the tenant, a
	/// reporter feeding the session's progress, and the session's cancellation token.
	pub async fn start_sync<F, Fut>(self: &Arc<Self>, tenant: TenantContext, sync_fn: F) -> SyncResult
	where
		F: FnOnce(TenantContext, ProgressReporter, CancellationToken) -> Fut + Send + 'static,
		Fut: Future<Output = Result<SyncOutcome, SalesSyncError>> + Send + 'static,
	{
		let mut sync_fn = Some(sync_fn);
		loop {
			let admission = {
				let mut state = self.lock_state();
				match state.session.as_ref() {
					Some(session) if session.tenant.is_same_company(&tenant) => {
						info!("Joining sync session {} for {}", session.id, tenant);
						Admission::Join(session.result.clone())
					}
					Some(session) => Admission::Wait(session.tenant.clone(), session.result.clone()),
					None => match sync_fn.take() {
						Some(sync_fn) => Admission::Join(self.begin_session(&mut state, tenant.clone(), sync_fn)),
						None => {
							return Err(Arc::new(SalesSyncError::Aborted(
								"sync routine was already consumed".to_string(),
							)));
						}
					},
				}
			};

			match admission {
				Admission::Join(result) => return result.await,
				Admission::Wait(running, result) => {
					info!("Sync for {} waiting on running sync for {}", tenant, running);
					// The other tenant's outcome is not ours to report.
					let _ = result.await;
				}
			}
		}
	}

	fn begin_session<F, Fut>(
		self: &Arc<Self>,
		state: &mut CoordinatorState,
		tenant: TenantContext,
		sync_fn: F,
	) -> SharedSync
	where
		F: FnOnce(TenantContext, ProgressReporter, CancellationToken) -> Fut + Send + 'static,
		Fut: Future<Output = Result<SyncOutcome, SalesSyncError>> + Send + 'static,
	{
		state.next_session_id += 1;
		let id = state.next_session_id;
		let cancel = CancellationToken::new();
		let reporter = self.reporter_for(id);

		let guard = SessionGuard {
			coordinator: Arc::clone(self),
			id,
		};
		let session_tenant = tenant.clone();
		let session_cancel = cancel.clone();
		let handle = tokio::spawn(async move {
			let _guard = guard;
			sync_fn(session_tenant, reporter, session_cancel)
				.await
				.map(Arc::new)
				.map_err(Arc::new)
		});

		let result = async move {
			match handle.await {
				Ok(result) => result,
				Err(e) => Err(Arc::new(SalesSyncError::Aborted(e.to_string()))),
			}
		}
		.boxed()
		.shared();

		info!("Started sync session {} for {}", id, tenant);
		state.settled = None;
		state.session = Some(Session {
			id,
			tenant,
			progress: Progress::default(),
			result: result.clone(),
			started_at: Utc::now(),
			cancel,
		});
		result
	}

	fn reporter_for(self: &Arc<Self>, id: u64) -> ProgressReporter {
		let coordinator = Arc::downgrade(self);
		ProgressReporter::new(move |progress| {
			if let Some(coordinator) = coordinator.upgrade() {
				coordinator.update_progress(id, progress);
			}
		})
	}

	fn update_progress(&self, id: u64, progress: Progress) {
		let listeners = {
			let mut state = self.lock_state();
			match state.session.as_mut() {
				Some(session) if session.id == id => session.progress = progress.clone(),
				_ => {
					debug!("Dropping progress from stale sync session {}", id);
					return;
				}
			}
			state.listeners.values().cloned().collect::<Vec<_>>()
		};
		broadcast(&listeners, &progress);
	}

	/// Clear session `id` once its task has finished.
	fn settle_session(self: &Arc<Self>, id: u64) {
		{
			let mut state = self.lock_state();
			match state.session.take() {
				Some(session) if session.id == id => {
					state.settled = Some((id, session.progress));
				}
				other => {
					// Cancelled earlier; a newer session may be running.
					state.session = other;
					return;
				}
			}
		}
		info!("Sync session {} settled", id);

		let coordinator = Arc::downgrade(self);
		let grace = self.config.settle_grace;
		match tokio::runtime::Handle::try_current() {
			Ok(runtime) => {
				runtime.spawn(async move {
					tokio::time::sleep(grace).await;
					if let Some(coordinator) = coordinator.upgrade() {
						coordinator.clear_settled(id);
					}
				});
			}
			Err(_) => self.clear_settled(id),
		}
	}

	fn clear_settled(&self, id: u64) {
		let listeners = {
			let mut state = self.lock_state();
			match state.settled {
				Some((settled_id, _)) if settled_id == id => state.settled = None,
				_ => return,
			}
			state.listeners.values().cloned().collect::<Vec<_>>()
		};
		broadcast(&listeners, &Progress::default());
	}

	pub fn is_sync_in_progress(&self) -> bool {
		self.lock_state().session.is_some()
	}

	/// Progress of the running session, or of the one that just settled.
	pub fn get_progress(&self) -> Progress {
		let state = self.lock_state();
		match (&state.session, &state.settled) {
			(Some(session), _) => session.progress.clone(),
			(None, Some((_, progress))) => progress.clone(),
			(None, None) => Progress::default(),
		}
	}

	/// Whether the running session belongs to the same company as `tenant`.
	pub fn is_same_company(&self, tenant: &TenantContext) -> bool {
		self.lock_state()
			.session
			.as_ref()
			.is_some_and(|session| session.tenant.is_same_company(tenant))
	}

	pub fn current_tenant(&self) -> Option<TenantContext> {
		self.lock_state()
			.session
			.as_ref()
			.map(|session| session.tenant.clone())
	}

	pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
		self.lock_state().session.as_ref().map(|session| session.started_at)
	}

	/// Cancel the running session, if any.
	///
	/// The session is cleared at once and a "Cancelled" progress is broadcast. The session's
	/// token is cancelled, which aborts its pending request; callers awaiting it then fail with
	/// [`SalesSyncError::Cancelled`]. Returns whether a session was running.
	pub fn cancel_sync(&self) -> bool {
		let (session, listeners) = {
			let mut state = self.lock_state();
			let Some(session) = state.session.take() else {
				return false;
			};
			state.settled = None;
			(session, state.listeners.values().cloned().collect::<Vec<_>>())
		};

		warn!("Cancelling sync session {} for {}", session.id, session.tenant);
		session.cancel.cancel();
		broadcast(&listeners, &Progress::new(0, 0, "Cancelled"));
		true
	}
}

fn broadcast(listeners: &[Listener], progress: &Progress) {
	for listener in listeners {
		listener(progress);
	}
}

/// Clears its session when the session's task ends, including on panic.
struct SessionGuard {
	coordinator: Arc<SyncCoordinator>,
	id: u64,
}

impl Drop for SessionGuard {
	fn drop(&mut self) {
		self.coordinator.settle_session(self.id);
	}
}

/// Handle returned by [`SyncCoordinator::subscribe`].
///
/// Dropping it keeps the observer registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
	id: u64,
	coordinator: Weak<SyncCoordinator>,
}

impl Subscription {
	/// Remove the observer. Calling this more than once is harmless.
	pub fn unsubscribe(&self) {
		if let Some(coordinator) = self.coordinator.upgrade() {
			coordinator.lock_state().listeners.remove(&self.id);
		}
	}
}
