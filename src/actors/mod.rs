//! Actor-based health trend system
//!
//! Each entity runs as an independent tokio task that owns its state and
//! processes commands from a bounded mailbox one at a time. Entities are
//! activated on first access through the [`system::ActorSystem`] directory,
//! load their durable state from the store, write every mutation back, and
//! deactivate after an idle timeout.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │    Scheduler     │ reminders
//!                 └────────┬─────────┘
//!                          │ ReminderFired
//!                 ┌────────▼─────────┐
//!                 │   ActorSystem    │ directory of live handles
//!                 └──┬──────┬─────┬──┘
//!                    │      │     │
//!     ┌──────────────▼┐  ┌──▼─────▼──────┐  ┌────────────────┐
//!     │ServiceMonitor │◄─┤  TrendActor   │◄─┤AggregatorActor │
//!     │ (per service) │  │ (per service) │  │   ("system")   │
//!     └───────┬───────┘  └───────────────┘  └────────────────┘
//!             │ HealthCheckEvent
//!     ┌───────▼───────┐
//!     │   broadcast   │
//!     └───────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each entity has an mpsc mailbox
//! 2. **Events**: new probe records fan out on a broadcast channel
//! 3. **Request/Response**: oneshot channels carry replies

pub mod aggregator;
pub mod directory;
pub mod fanout;
pub mod messages;
pub mod service_monitor;
pub mod system;
pub mod trend;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

pub use aggregator::{AggregatorHandle, AggregatorOptions};
pub use messages::HealthCheckEvent;
pub use service_monitor::MonitorHandle;
pub use system::{ActorSettings, ActorSystem};
pub use trend::TrendHandle;

/// Failures talking to an entity
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("mailbox of {0} is closed")]
    MailboxClosed(String),

    #[error("{0} dropped the reply")]
    ReplyDropped(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("service {0} is not registered")]
    NotRegistered(String),
}

/// Send a command carrying a reply channel and wait for the reply
pub(crate) async fn request<C, T>(
    sender: &mpsc::Sender<C>,
    entity: &str,
    make: impl FnOnce(oneshot::Sender<T>) -> C,
) -> Result<T, ActorError> {
    let (tx, rx) = oneshot::channel();
    sender
        .send(make(tx))
        .await
        .map_err(|_| ActorError::MailboxClosed(entity.to_string()))?;
    rx.await
        .map_err(|_| ActorError::ReplyDropped(entity.to_string()))
}

/// Attempts made by [`retry_with_backoff`]
pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Wait `base × 2^attempt` before the next try
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, backing off between failures
pub(crate) async fn retry_with_backoff<T, F, Fut>(base: Duration, op: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < MAX_ATTEMPTS => {
                warn!(attempt, "attempt failed, retrying: {:#}", e);
                tokio::time::sleep(backoff_delay(base, attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("giving up after {MAX_ATTEMPTS} attempts"))),
        }
    }
}

/// `now - window`, clamped to the earliest representable instant
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
