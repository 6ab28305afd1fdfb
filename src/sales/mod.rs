pub mod sync;
pub mod types;

pub use sync::{SalesSyncService, SyncCoordinator};
pub use types::*;
