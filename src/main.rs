use ledger_sales_sync::config::Settings;
use ledger_sales_sync::ledger::{LedgerApi, TallyLedgerClient};
use ledger_sales_sync::sales::sync::{CacheStore, FileCacheStore, SalesSyncService, SyncCoordinator};

use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let settings = match Settings::from_env() {
		Ok(settings) => settings,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	info!(
		"Starting sales sync for {} against {} ({} profile)",
		settings.tenant, settings.api_url, settings.profile
	);

	let mut client = match TallyLedgerClient::new(settings.api_url.clone()) {
		Ok(client) => client,
		Err(e) => {
			error!("Failed to create ledger client: {}", e);
			return;
		}
	};
	if let Some(token) = &settings.auth_token {
		client = client.with_auth_token(token.clone());
	}

	let api: Arc<dyn LedgerApi> = Arc::new(client);
	let cache: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(settings.cache_dir.clone()));
	let service = Arc::new(SalesSyncService::new(api, cache, settings.fetch_policy()));
	let coordinator = SyncCoordinator::new(settings.coordinator_config());

	let subscription = coordinator.subscribe(|progress| {
		if !progress.is_empty() {
			info!("[{}/{}] {}", progress.current, progress.total, progress.message);
		}
	});

	let result = coordinator
		.start_sync(settings.tenant.clone(), service.sync_fn(settings.window))
		.await;
	subscription.unsubscribe();

	match result {
		Ok(outcome) if outcome.success => info!(
			"Sales sync finished: {} vouchers stored ({} new, last alter id {:?}, {} chunks)",
			outcome.count, outcome.new_records, outcome.last_alter_id, outcome.chunks
		),
		Ok(outcome) => error!(
			"Sales sync fetched nothing usable, kept {} cached vouchers",
			outcome.count
		),
		Err(e) => error!("Sales sync failed: {}", e),
	}
}
