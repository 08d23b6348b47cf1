//! In-memory storage backend (no persistence)
//!
//! Useful for tests and for deployments that configure `"backend": "none"`.
//! All state is lost on restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StateStore};
use super::error::StorageResult;
use super::schema::{EntityKey, ReminderRow, StateRow};

#[derive(Default)]
pub struct MemoryBackend {
    states: RwLock<HashMap<EntityKey, StateRow>>,
    reminders: RwLock<BTreeMap<(EntityKey, String), ReminderRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored state documents
    pub async fn state_count(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl StateStore for MemoryBackend {
    async fn load_state(&self, key: &EntityKey) -> StorageResult<Option<StateRow>> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn save_state(&self, row: StateRow) -> StorageResult<()> {
        debug!(key = %row.key, "saving state in memory");
        self.states.write().await.insert(row.key.clone(), row);
        Ok(())
    }

    async fn delete_state(&self, key: &EntityKey) -> StorageResult<bool> {
        Ok(self.states.write().await.remove(key).is_some())
    }

    async fn save_reminder(&self, row: ReminderRow) -> StorageResult<()> {
        self.reminders
            .write()
            .await
            .insert((row.key.clone(), row.name.clone()), row);
        Ok(())
    }

    async fn delete_reminder(&self, key: &EntityKey, name: &str) -> StorageResult<bool> {
        Ok(self
            .reminders
            .write()
            .await
            .remove(&(key.clone(), name.to_string()))
            .is_some())
    }

    async fn load_reminders(&self) -> StorageResult<Vec<ReminderRow>> {
        let mut rows: Vec<ReminderRow> = self.reminders.read().await.values().cloned().collect();
        rows.sort_by_key(|r| r.due_at);
        Ok(rows)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let states = self.states.read().await.len();
        let reminders = self.reminders.read().await.len();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("states".to_string(), states.to_string()),
                ("reminders".to_string(), reminders.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
