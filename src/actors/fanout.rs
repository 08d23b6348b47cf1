//! Bounded concurrent fan-out
//!
//! Runs one spawned sub-call per key with at most `limit` in flight. All
//! sub-calls share a cancellation token; cancelling it aborts the calls that
//! are still waiting for a permit or running.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::ActorError;

/// Results are returned in the order of `keys`
pub async fn bounded_fan_out<K, T, F, Fut>(
    keys: Vec<K>,
    limit: usize,
    cancel: &CancellationToken,
    op: F,
) -> Vec<(K, Result<T>)>
where
    K: Clone,
    T: Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let tasks: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let call = op(key.clone());

            let task = tokio::spawn(run_bounded(semaphore, cancel, call));
            (key, task)
        })
        .collect();

    let mut results = Vec::with_capacity(tasks.len());
    for (key, task) in tasks {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("fan-out task failed: {e}")),
        };
        results.push((key, result));
    }
    results
}

async fn run_bounded<T>(
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let permit = tokio::select! {
        permit = semaphore.acquire_owned() => permit,
        _ = cancel.cancelled() => return Err(ActorError::Cancelled.into()),
    };
    let _permit = permit.context("fan-out semaphore closed")?;

    tokio::select! {
        result = call => result,
        _ = cancel.cancelled() => Err(ActorError::Cancelled.into()),
    }
}
