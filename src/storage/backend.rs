//! State store trait definition

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{EntityKey, ReminderRow, StateRow};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Durable key/value store for actor state and reminders
///
/// Implementations must be `Send + Sync`; a single store is shared by every
/// actor in the system. Writes for one key are serialized by the owning
/// actor, so backends only need last-writer-wins semantics per key.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state document for `key`, if one was ever written
    async fn load_state(&self, key: &EntityKey) -> StorageResult<Option<StateRow>>;

    /// Insert or replace the state document for `row.key`
    async fn save_state(&self, row: StateRow) -> StorageResult<()>;

    /// Remove the state document for `key`; returns whether it existed
    async fn delete_state(&self, key: &EntityKey) -> StorageResult<bool>;

    /// Insert or replace the reminder `(row.key, row.name)`
    async fn save_reminder(&self, row: ReminderRow) -> StorageResult<()>;

    async fn delete_reminder(&self, key: &EntityKey, name: &str) -> StorageResult<bool>;

    /// Every stored reminder, ordered by due time
    async fn load_reminders(&self) -> StorageResult<Vec<ReminderRow>>;

    /// Lightweight liveness probe of the backend
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Release connections and flush pending writes
    async fn close(&self) -> StorageResult<()>;
}
