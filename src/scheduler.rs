//! Durable reminders
//!
//! A reminder is a `(entity, name, due time, period)` row kept in the
//! [`StateStore`]. Every armed reminder owns one timer task. When the timer
//! elapses a [`ReminderFired`] message is pushed to the actor system, which
//! routes it to the owning entity. Delivery is at-least-once: the next due
//! time is persisted after each firing, so a restart re-arms every row and a
//! reminder that became due while the process was down fires immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::storage::{EntityKey, ReminderRow, StateStore};

/// Probe the service owned by a ServiceMonitor
pub const HEALTH_CHECK_REMINDER: &str = "health-check";

/// Recompute the standard windows of a TrendActor
pub const TREND_REFRESH_REMINDER: &str = "trend-refresh";

/// Refresh every service known to the aggregator
pub const AGGREGATOR_REFRESH_REMINDER: &str = "aggregator-refresh";

/// A reminder became due
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderFired {
    pub target: EntityKey,
    pub name: String,
    pub fired_at: DateTime<Utc>,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Persist the reminder and (re)start its timer
    ///
    /// Registering an existing `(key, name)` pair replaces its schedule.
    async fn register_or_update(&self, reminder: ReminderRow) -> Result<()>;

    /// Stop the timer and forget the reminder
    async fn unregister(&self, key: &EntityKey, name: &str) -> Result<()>;

    /// Arm a timer for every persisted reminder; returns how many were armed
    async fn rearm_all(&self) -> Result<usize>;
}

type TimerKey = (EntityKey, String);

/// [`Scheduler`] backed by the state store and tokio timers
pub struct ReminderScheduler {
    store: Arc<dyn StateStore>,
    fired_tx: mpsc::Sender<ReminderFired>,
    timers: Mutex<HashMap<TimerKey, CancellationToken>>,
    shutdown: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn StateStore>, fired_tx: mpsc::Sender<ReminderFired>) -> Self {
        Self {
            store,
            fired_tx,
            timers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of running timers
    pub fn armed_count(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }

    /// Stop every timer; persisted rows are left untouched
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(mut timers) = self.timers.lock() {
            timers.clear();
        }
    }

    fn arm(&self, reminder: ReminderRow) {
        let token = self.shutdown.child_token();
        let timer_key = (reminder.key.clone(), reminder.name.clone());

        match self.timers.lock() {
            Ok(mut timers) => {
                if let Some(previous) = timers.insert(timer_key, token.clone()) {
                    previous.cancel();
                }
            }
            Err(e) => {
                error!("reminder table poisoned: {}", e);
                return;
            }
        }

        let timer = ReminderTimer {
            reminder,
            store: self.store.clone(),
            fired_tx: self.fired_tx.clone(),
            token,
        };
        tokio::spawn(timer.run());
    }

    fn disarm(&self, key: &EntityKey, name: &str) {
        let removed = self
            .timers
            .lock()
            .ok()
            .and_then(|mut timers| timers.remove(&(key.clone(), name.to_string())));
        if let Some(token) = removed {
            token.cancel();
        }
    }
}

#[async_trait]
impl Scheduler for ReminderScheduler {
    #[instrument(skip(self, reminder), fields(key = %reminder.key, name = %reminder.name))]
    async fn register_or_update(&self, reminder: ReminderRow) -> Result<()> {
        self.store
            .save_reminder(reminder.clone())
            .await
            .context("failed to persist reminder")?;

        debug!(due_at = %reminder.due_at, period = ?reminder.period, "reminder registered");
        self.arm(reminder);
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn unregister(&self, key: &EntityKey, name: &str) -> Result<()> {
        self.disarm(key, name);
        self.store
            .delete_reminder(key, name)
            .await
            .context("failed to delete reminder")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rearm_all(&self) -> Result<usize> {
        let reminders = self
            .store
            .load_reminders()
            .await
            .context("failed to load reminders")?;

        let count = reminders.len();
        for reminder in reminders {
            self.arm(reminder);
        }

        info!("re-armed {} reminders", count);
        Ok(count)
    }
}

/// One running reminder
struct ReminderTimer {
    reminder: ReminderRow,
    store: Arc<dyn StateStore>,
    fired_tx: mpsc::Sender<ReminderFired>,
    token: CancellationToken,
}

impl ReminderTimer {
    async fn run(mut self) {
        let delay = (self.reminder.due_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        if !self.sleep(delay).await {
            return;
        }

        loop {
            let fired_at = Utc::now();
            trace!(key = %self.reminder.key, name = %self.reminder.name, "reminder fired");

            let fired = ReminderFired {
                target: self.reminder.key.clone(),
                name: self.reminder.name.clone(),
                fired_at,
            };
            if self.fired_tx.send(fired).await.is_err() {
                debug!("reminder receiver gone, stopping timer");
                return;
            }

            if self.reminder.period.is_zero() {
                if let Err(e) = self
                    .store
                    .delete_reminder(&self.reminder.key, &self.reminder.name)
                    .await
                {
                    warn!("failed to delete one-shot reminder: {}", e);
                }
                return;
            }

            let Some(next_due) = chrono::Duration::from_std(self.reminder.period)
                .ok()
                .and_then(|period| fired_at.checked_add_signed(period))
            else {
                warn!(period = ?self.reminder.period, "reminder period out of range, stopping timer");
                return;
            };
            self.reminder.due_at = next_due;
            if let Err(e) = self.store.save_reminder(self.reminder.clone()).await {
                warn!("failed to persist next due time: {}", e);
            }

            if !self.sleep(self.reminder.period).await {
                return;
            }
        }
    }

    /// Returns false when the timer was cancelled
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
