//! Row definitions for persisted entity state and reminders
//!
//! State documents are stored as opaque JSON so the shape of an actor's state
//! can evolve without a migration. Only the key columns are typed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Kind of entity owning a state document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ServiceMonitor,
    TrendActor,
    Aggregator,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::ServiceMonitor => write!(f, "service_monitor"),
            EntityKind::TrendActor => write!(f, "trend_actor"),
            EntityKind::Aggregator => write!(f, "aggregator"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service_monitor" => Ok(EntityKind::ServiceMonitor),
            "trend_actor" => Ok(EntityKind::TrendActor),
            "aggregator" => Ok(EntityKind::Aggregator),
            other => Err(StorageError::SerializationError(format!(
                "unknown entity kind: {}",
                other
            ))),
        }
    }
}

/// Identity of a persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn service_monitor(id: impl Into<String>) -> Self {
        Self::new(EntityKind::ServiceMonitor, id)
    }

    pub fn trend_actor(id: impl Into<String>) -> Self {
        Self::new(EntityKind::TrendActor, id)
    }

    pub fn aggregator(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Aggregator, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A single state document
#[derive(Debug, Clone, PartialEq)]
pub struct StateRow {
    pub key: EntityKey,

    /// JSON encoded actor state
    pub payload: String,

    pub updated_at: DateTime<Utc>,
}

impl StateRow {
    /// Encode `state` into a row stamped with `updated_at`
    pub fn encode<T: Serialize>(
        key: EntityKey,
        state: &T,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<Self> {
        let payload = serde_json::to_string(state).map_err(|e| {
            StorageError::SerializationError(format!("failed to encode state for {}: {}", key, e))
        })?;

        Ok(Self {
            key,
            payload,
            updated_at,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_str(&self.payload).map_err(|e| {
            StorageError::SerializationError(format!(
                "failed to decode state for {}: {}",
                self.key, e
            ))
        })
    }
}

/// A durable reminder owned by an entity
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderRow {
    pub key: EntityKey,
    pub name: String,

    /// Next time the reminder is due
    pub due_at: DateTime<Utc>,

    /// Interval between firings after the first one
    pub period: Duration,
}
