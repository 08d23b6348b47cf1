//! Directory of live entity handles
//!
//! Looking up a key either returns the handle of the running entity or
//! activates a new one. An entity whose mailbox has closed (idle timeout,
//! shutdown) is replaced on the next lookup, which rehydrates it from the
//! store. The replacement only loads state after the previous activation has
//! drained its mailbox and finished its last write, so one key never has two
//! writers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A handle to a running entity
pub trait ActorHandle: Clone + Send + 'static {
    /// False once the mailbox is closed
    fn is_alive(&self) -> bool;

    /// Cancelled after the entity's task has finished
    fn stopped(&self) -> &CancellationToken;
}

/// Orders successive activations of one key
pub struct Activation {
    previous: Option<CancellationToken>,
    stopped: CancellationToken,
}

impl Activation {
    pub fn new(previous: Option<CancellationToken>) -> Self {
        Self {
            previous,
            stopped: CancellationToken::new(),
        }
    }

    pub fn stopped(&self) -> CancellationToken {
        self.stopped.clone()
    }

    /// Run `actor` once the previous activation has stopped
    pub async fn run(self, actor: impl Future<Output = ()>) {
        let _stopped = self.stopped.drop_guard();
        if let Some(previous) = self.previous {
            if !previous.is_cancelled() {
                debug!("waiting for the previous activation to stop");
            }
            previous.cancelled().await;
        }
        actor.await;
    }
}

pub struct Directory<H> {
    live: Mutex<HashMap<String, H>>,
}

impl<H: ActorHandle> Directory<H> {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `id`, calling `activate` when no live entity exists
    ///
    /// `activate` receives the stop token of the activation it replaces.
    pub fn get_or_activate(
        &self,
        id: &str,
        activate: impl FnOnce(Option<CancellationToken>) -> H,
    ) -> H {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = match live.get(id) {
            Some(handle) if handle.is_alive() => return handle.clone(),
            Some(handle) => Some(handle.stopped().clone()),
            None => None,
        };

        debug!(id, "activating entity");
        let handle = activate(previous);
        live.insert(id.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, id: &str) -> Option<H> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .filter(|h| h.is_alive())
            .cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| h.is_alive())
            .count()
    }

    /// Remove and return every handle
    pub fn drain(&self) -> Vec<H> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, h)| h)
            .collect()
    }
}

impl<H: ActorHandle> Default for Directory<H> {
    fn default() -> Self {
        Self::new()
    }
}
