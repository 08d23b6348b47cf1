//! Durable state for the actor system
//!
//! Every entity (service monitor, trend actor, aggregator) owns exactly one
//! JSON document keyed by `(kind, id)`. Actors load their document when they
//! activate and write it back after every mutation. Reminders live next to
//! the state so the scheduler can re-arm them after a restart.
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database, survives restarts
//! - **In-Memory**: no persistence, for tests and `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use health_trends::storage::{StateStore, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./health-trends.db").await?;
//!     let health = backend.health_check().await?;
//!     assert!(health.healthy);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, StateStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{EntityKey, EntityKind, ReminderRow, StateRow};

use crate::config::StorageConfig;

/// Build the backend selected in the configuration
///
/// A missing storage section falls back to the in-memory backend.
pub async fn open_backend(config: Option<&StorageConfig>) -> StorageResult<Arc<dyn StateStore>> {
    match config {
        None | Some(StorageConfig::None) => {
            info!("using in-memory state store");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        Some(StorageConfig::Sqlite { path }) => {
            let backend = sqlite::SqliteBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        Some(StorageConfig::Sqlite { .. }) => Err(StorageError::InvalidConfig(
            "sqlite storage requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}
