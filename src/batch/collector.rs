//! Bounded worker pool with completion-ordered collection.

use super::outcome::ItemOutcome;
use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// What a worker hands back for one item.
#[derive(Debug)]
pub(crate) enum WorkerReport<I> {
    /// The item ran and reached a terminal state.
    Completed(ItemOutcome<I>),
    /// Cancellation was observed before real work began.
    NotStarted(I),
}

/// Result of one blocking take from the pool.
#[derive(Debug)]
pub(crate) enum Collected<I> {
    Report(WorkerReport<I>),
    /// The task vanished without a report (aborted by the runtime).
    Lost(JoinError),
    Cancelled,
    Exhausted,
}

/// Run `job` for `item`, turning a panic into a failed outcome for that item.
pub(crate) async fn run_guarded<I, F, Fut>(item: I, job: F) -> WorkerReport<I>
where
    I: Clone + Display,
    F: FnOnce(I) -> Fut,
    Fut: Future<Output = WorkerReport<I>>,
{
    let fallback = item.clone();
    match AssertUnwindSafe(job(item)).catch_unwind().await {
        Ok(report) => report,
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            tracing::error!(item = %fallback, panic = %msg, "item processing panicked");
            WorkerReport::Completed(ItemOutcome::failed(
                fallback,
                format!("Execution error: {}", msg),
            ))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker pool scoped to a single batch run.
///
/// Concurrency is bounded by a semaphore of `size` permits; tasks are spawned
/// immediately and wait for a permit, so submission never blocks the caller.
/// Dropping the pool aborts whatever is still running.
pub(crate) struct WorkerPool<I> {
    tasks: JoinSet<(usize, WorkerReport<I>)>,
    permits: Arc<Semaphore>,
    size: usize,
    /// Submitted items by submission index, cleared once their report arrives.
    unreported: Vec<Option<I>>,
}

impl<I> WorkerPool<I>
where
    I: Clone + Display + Send + 'static,
{
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(size)),
            size,
            unreported: Vec::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn submit<F, Fut>(&mut self, item: I, cancel: CancellationToken, job: F)
    where
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = WorkerReport<I>> + Send + 'static,
    {
        let index = self.unreported.len();
        self.unreported.push(Some(item.clone()));
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return (index, WorkerReport::NotStarted(item)),
                permit = permits.acquire_owned() => permit,
            };
            // A closed semaphore means the pool stopped admitting work.
            let Ok(_permit) = permit else {
                return (index, WorkerReport::NotStarted(item));
            };
            (index, run_guarded(item, job).await)
        });
    }

    /// Items whose task ended without handing back a report.
    ///
    /// Only meaningful once every task has been joined.
    pub(crate) fn take_unreported(&mut self) -> Vec<I> {
        self.unreported.drain(..).flatten().collect()
    }

    /// Block until the next task finishes, whichever it is.
    pub(crate) async fn next_completed(&mut self, cancel: &CancellationToken) -> Collected<I> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Collected::Cancelled,
            joined = self.tasks.join_next() => match joined {
                None => Collected::Exhausted,
                Some(Ok((index, report))) => {
                    if let Some(slot) = self.unreported.get_mut(index) {
                        *slot = None;
                    }
                    Collected::Report(report)
                }
                Some(Err(e)) => Collected::Lost(e),
            },
        }
    }

    /// Stop admitting work, give running tasks `grace` to wind down, then abort the rest.
    ///
    /// Reports that arrive during the grace period are not collected.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.permits.close();
        if self.tasks.is_empty() {
            return;
        }

        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                joined = self.tasks.join_next() => match joined {
                    None => return,
                    Some(Ok((_, WorkerReport::Completed(outcome)))) => {
                        tracing::debug!(item = %outcome.item, "item finished after collection stopped, not counted");
                    }
                    Some(_) => {}
                },
            }
        }

        tracing::warn!(outstanding = self.tasks.len(), "aborting workers still running after grace period");
        self.tasks.shutdown().await;
    }
}
