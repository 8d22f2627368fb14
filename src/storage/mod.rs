//! Storage for observation history and alert state
//!
//! Two traits, both implemented by every backend:
//!
//! - [`HistoryStore`]: bounded, time-ordered observations per resource
//! - [`AlertStateStore`]: one [`AlertState`](crate::dedup::AlertState) per `(resource, rule)`
//!
//! ## Backends
//!
//! - **In-Memory** (default): sharded maps, lost on restart
//! - **SQLite** (`storage-sqlite` feature): survives restarts so re-notify
//!   cadence holds across deploys
//!
//! ## Usage
//!
//! ```no_run
//! use kube_sentinel::storage::{Retention, sqlite::SqliteStore};
//! use kube_sentinel::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let store = SqliteStore::new("./sentinel.db", Retention::from_config(&config)).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use backend::{AlertStateStore, HistoryEntry, HistoryStore, Retention, Store};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

use crate::config::{Config, StorageConfig};

/// Build the backend selected in the configuration
pub async fn open(config: &Config) -> StorageResult<Arc<dyn Store>> {
    let retention = Retention::from_config(config);
    match &config.storage {
        StorageConfig::None => Ok(Arc::new(MemoryStore::new(retention))),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            Ok(Arc::new(sqlite::SqliteStore::new(path, retention).await?))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "sqlite storage requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}
