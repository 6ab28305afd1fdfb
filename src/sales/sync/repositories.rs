use crate::sales::{SalesSnapshot, SalesSyncError, SyncMetadata, TenantContext};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Per-tenant storage for the last synchronized snapshot and its metadata.
///
/// Writers are not locked here: the coordinator guarantees a single sync per tenant.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
	async fn get_last_alter_id(&self, tenant: &TenantContext) -> Result<Option<i64>, SalesSyncError>;

	async fn get_metadata(&self, tenant: &TenantContext) -> Result<Option<SyncMetadata>, SalesSyncError>;

	async fn get_complete_sales_data(
		&self,
		tenant: &TenantContext,
	) -> Result<Option<SalesSnapshot>, SalesSyncError>;

	async fn set_complete_sales_data(
		&self,
		tenant: &TenantContext,
		data: &SalesSnapshot,
		metadata: &SyncMetadata,
	) -> Result<(), SalesSyncError>;
}

/// In-memory implementation of CacheStore
#[derive(Default)]
pub struct MemoryCacheStore {
	entries: Mutex<HashMap<String, (SalesSnapshot, SyncMetadata)>>,
}

impl MemoryCacheStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn entry(&self, tenant: &TenantContext) -> Option<(SalesSnapshot, SyncMetadata)> {
		self.entries
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&tenant.cache_key())
			.cloned()
	}
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
	async fn get_last_alter_id(&self, tenant: &TenantContext) -> Result<Option<i64>, SalesSyncError> {
		Ok(self.entry(tenant).and_then(|(_, metadata)| metadata.last_alter_id))
	}

	async fn get_metadata(&self, tenant: &TenantContext) -> Result<Option<SyncMetadata>, SalesSyncError> {
		Ok(self.entry(tenant).map(|(_, metadata)| metadata))
	}

	async fn get_complete_sales_data(
		&self,
		tenant: &TenantContext,
	) -> Result<Option<SalesSnapshot>, SalesSyncError> {
		Ok(self.entry(tenant).map(|(snapshot, _)| snapshot))
	}

	async fn set_complete_sales_data(
		&self,
		tenant: &TenantContext,
		data: &SalesSnapshot,
		metadata: &SyncMetadata,
	) -> Result<(), SalesSyncError> {
		self.entries
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(tenant.cache_key(), (data.clone(), metadata.clone()));
		Ok(())
	}
}

/// Metadata file contents, stamped with the time of the write.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
	#[serde(flatten)]
	metadata: SyncMetadata,
	synced_at: String,
	voucher_count: usize,
}

/// File-based implementation of CacheStore
///
/// Each tenant gets `sales_<hex key>.json` for the vouchers and `sales_<hex key>.meta.json` for the
/// metadata. The snapshot is written before the metadata, so a crash between the two leaves
/// the old high-water mark in place and the next sync simply refetches.
pub struct FileCacheStore {
	data_dir: PathBuf,
}

impl FileCacheStore {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_snapshot_filename(&self, tenant: &TenantContext) -> PathBuf {
		self.data_dir
			.join(format!("sales_{}.json", hex::encode(tenant.cache_key())))
	}

	fn get_metadata_filename(&self, tenant: &TenantContext) -> PathBuf {
		self.data_dir
			.join(format!("sales_{}.meta.json", hex::encode(tenant.cache_key())))
	}

	async fn read_metadata(&self, tenant: &TenantContext) -> Result<Option<MetadataFile>, SalesSyncError> {
		let filename = self.get_metadata_filename(tenant);
		let content = match tokio::fs::read_to_string(&filename).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => {
				return Err(SalesSyncError::Cache(format!(
					"Failed to read sales metadata {:?}: {}",
					filename, e
				)));
			}
		};

		match serde_json::from_str::<MetadataFile>(&content) {
			Ok(metadata) => Ok(Some(metadata)),
			Err(e) => {
				// A corrupt metadata file only costs a full refetch.
				warn!("Ignoring unreadable sales metadata {:?}: {}", filename, e);
				Ok(None)
			}
		}
	}

	async fn write_atomically(&self, filename: &Path, content: String) -> Result<(), SalesSyncError> {
		let temp = filename.with_extension("tmp");
		tokio::fs::write(&temp, content).await.map_err(|e| {
			SalesSyncError::Cache(format!("Failed to write {:?}: {}", temp, e))
		})?;
		tokio::fs::rename(&temp, filename).await.map_err(|e| {
			SalesSyncError::Cache(format!("Failed to move {:?} into place: {}", filename, e))
		})?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl CacheStore for FileCacheStore {
	async fn get_last_alter_id(&self, tenant: &TenantContext) -> Result<Option<i64>, SalesSyncError> {
		Ok(self
			.read_metadata(tenant)
			.await?
			.and_then(|file| file.metadata.last_alter_id))
	}

	async fn get_metadata(&self, tenant: &TenantContext) -> Result<Option<SyncMetadata>, SalesSyncError> {
		Ok(self.read_metadata(tenant).await?.map(|file| file.metadata))
	}

	async fn get_complete_sales_data(
		&self,
		tenant: &TenantContext,
	) -> Result<Option<SalesSnapshot>, SalesSyncError> {
		let filename = self.get_snapshot_filename(tenant);
		let content = match tokio::fs::read_to_string(&filename).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		let snapshot: SalesSnapshot = serde_json::from_str(&content).map_err(|e| {
			SalesSyncError::Cache(format!("Failed to parse sales snapshot {:?}: {}", filename, e))
		})?;

		info!(
			"Loaded {} cached vouchers for {} from {:?}",
			snapshot.vouchers.len(),
			tenant,
			filename
		);
		Ok(Some(snapshot))
	}

	async fn set_complete_sales_data(
		&self,
		tenant: &TenantContext,
		data: &SalesSnapshot,
		metadata: &SyncMetadata,
	) -> Result<(), SalesSyncError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		let snapshot_filename = self.get_snapshot_filename(tenant);
		self.write_atomically(&snapshot_filename, serde_json::to_string(data)?)
			.await?;

		let metadata_file = MetadataFile {
			metadata: metadata.clone(),
			synced_at: chrono::Utc::now().to_rfc3339(),
			voucher_count: data.vouchers.len(),
		};
		let metadata_filename = self.get_metadata_filename(tenant);
		self.write_atomically(
			&metadata_filename,
			serde_json::to_string_pretty(&metadata_file)?,
		)
		.await?;

		info!(
			"Saved {} vouchers for {} to {:?} (last alter id {:?})",
			data.vouchers.len(),
			tenant,
			snapshot_filename,
			metadata.last_alter_id
		);
		Ok(())
	}
}
