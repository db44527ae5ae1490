//! Batch executor: warm-up, fan-out, completion collection, aggregation.

use super::capacity::{Capacity, ConcurrencyPlan};
use super::collector::{run_guarded, Collected, WorkerPool, WorkerReport};
use super::config::BatchConfig;
use super::outcome::{Aggregator, BatchResult, ItemOutcome, ItemOutput};
use super::progress::{ChannelProgressSink, NoopProgressSink, ProgressEvent, ProgressSink};
use super::schedule::order_by_cost;
use crate::resilience::RateBudget;
use crate::Result;
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};
use uuid::Uuid;

/// Note on the informational event published before the warm-up item.
pub const WARM_UP_NOTE: &str = "Warming up with the smallest item...";

/// The per-item transformation applied by a batch.
///
/// Implementations must be safe to call from many tasks at once. `cancel` is the
/// batch's token; long-running work should check it at convenient points.
#[async_trait]
pub trait ItemProcessor<I: Send + Sync + 'static>: Send + Sync + 'static {
    /// Units charged against the rate budget before `process` runs (budgeted runs only).
    fn spend_estimate(&self, _item: &I) -> Result<u64> {
        Ok(1)
    }

    async fn process(&self, item: &I, cancel: &CancellationToken) -> Result<ItemOutput>;
}

type SpendFn<I> = Box<dyn Fn(&I) -> Result<u64> + Send + Sync>;

/// Adapter turning an async closure into an [`ItemProcessor`].
///
/// Without [`with_spend_estimate`](FnProcessor::with_spend_estimate) every item
/// is charged one unit against a rate budget.
///
/// ```rust
/// use batch_forge::batch::{FnProcessor, ItemOutput};
/// use batch_forge::tokens::{estimate_file_tokens, CharacterEstimator};
///
/// let edit: FnProcessor<String, _> = FnProcessor::new(|path: String| async move {
///     Ok::<_, batch_forge::Error>(ItemOutput::success(format!("edited {}", path)))
/// })
/// .with_spend_estimate(|path: &String| {
///     estimate_file_tokens(path, &CharacterEstimator::new(), &["Rename foo to bar"])
/// });
/// ```
pub struct FnProcessor<I, F> {
    f: F,
    spend: Option<SpendFn<I>>,
    _item: PhantomData<fn(I)>,
}

impl<I, F> FnProcessor<I, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            spend: None,
            _item: PhantomData,
        }
    }

    /// Charge each item `estimate(item)` units on budgeted runs.
    pub fn with_spend_estimate<E>(mut self, estimate: E) -> Self
    where
        E: Fn(&I) -> Result<u64> + Send + Sync + 'static,
    {
        self.spend = Some(Box::new(estimate));
        self
    }
}

#[async_trait]
impl<I, F, Fut> ItemProcessor<I> for FnProcessor<I, F>
where
    I: Clone + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ItemOutput>> + Send + 'static,
{
    fn spend_estimate(&self, item: &I) -> Result<u64> {
        match &self.spend {
            Some(estimate) => estimate(item),
            None => Ok(1),
        }
    }

    async fn process(&self, item: &I, _cancel: &CancellationToken) -> Result<ItemOutput> {
        (self.f)(item.clone()).await
    }
}

/// Await a sink call unless the run is cancelled first.
///
/// A sink that applies backpressure (a full progress channel) must never keep a
/// cancelled run from returning. The call is polled first, so a sink that is
/// ready still sees the event after cancellation.
async fn until_cancelled<F: Future<Output = ()>>(call: F, cancel: &CancellationToken) {
    tokio::select! {
        biased;
        _ = call => {}
        _ = cancel.cancelled() => {
            debug!("sink call abandoned after cancellation");
        }
    }
}

/// One item through the budget gate and the processor.
async fn execute_item<I, P>(
    item: I,
    processor: Arc<P>,
    budget: Option<Arc<RateBudget>>,
    cancel: CancellationToken,
) -> WorkerReport<I>
where
    I: Clone + Display + Send + Sync + 'static,
    P: ItemProcessor<I> + ?Sized,
{
    if cancel.is_cancelled() {
        return WorkerReport::NotStarted(item);
    }

    if let Some(budget) = budget {
        let spend = match processor.spend_estimate(&item) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(item = %item, error = %e, "spend estimate failed");
                return WorkerReport::Completed(ItemOutcome::failed(
                    item,
                    format!("Error estimating spend: {}", e),
                ));
            }
        };
        if budget.acquire(spend, &cancel).await.is_err() {
            debug!(item = %item, spend, "rate budget wait cancelled");
            return WorkerReport::NotStarted(item);
        }
    }

    let outcome = match processor.process(&item, &cancel).await {
        Ok(output) => ItemOutcome::from_output(item, output),
        Err(e) => {
            tracing::warn!(item = %item, error = %e, "item processing failed");
            let msg = format!("Unexpected error: {}", e);
            ItemOutcome::failed(item, msg)
        }
    };
    WorkerReport::Completed(outcome)
}

/// Runs one processor over a batch of items under a single capacity limit.
///
/// The cheapest item runs first on the calling task; the rest fan out to a
/// worker pool and are collected in completion order. Every run produces
/// exactly one [`BatchResult`]; the only error is a bad capacity configuration,
/// reported before any item is touched.
pub struct BatchExecutor<I: Send + Sync + 'static> {
    capacity: Capacity,
    config: BatchConfig,
    sink: Arc<dyn ProgressSink<I>>,
}

impl<I> BatchExecutor<I>
where
    I: Clone + Display + Send + Sync + 'static,
{
    pub fn new(capacity: Capacity, config: BatchConfig) -> Self {
        Self {
            capacity,
            config,
            sink: Arc::new(NoopProgressSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink<I>>) -> Self {
        self.sink = sink;
        self
    }

    /// Report progress onto a bounded channel sized by `config.progress_buffer`.
    ///
    /// The receiver must be drained while the run is in progress: once the
    /// buffer is full the run waits for the consumer (or for cancellation).
    pub fn with_progress_channel(self) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sink, rx) = ChannelProgressSink::channel(self.config.progress_buffer);
        (self.with_sink(Arc::new(sink)), rx)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub async fn run<P, C>(
        &self,
        items: Vec<I>,
        cost: C,
        processor: Arc<P>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult<I>>
    where
        P: ItemProcessor<I> + ?Sized,
        C: Fn(&I) -> Result<u64>,
    {
        let span = tracing::debug_span!("batch_run", run_id = %Uuid::new_v4(), total = items.len());
        self.run_inner(items, cost, processor, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner<P, C>(
        &self,
        items: Vec<I>,
        cost: C,
        processor: Arc<P>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult<I>>
    where
        P: ItemProcessor<I> + ?Sized,
        C: Fn(&I) -> Result<u64>,
    {
        let started = Instant::now();
        let total = items.len();

        let plan = ConcurrencyPlan::configure_with(
            self.capacity,
            total,
            self.config.oversubscribed_pool_size,
        )?;
        debug!(
            pool_size = plan.pool_size,
            rate_budgeted = plan.is_rate_budgeted(),
            "batch configured"
        );

        self.sink.on_start(total).await;
        let mut agg = Aggregator::new(total);
        if items.is_empty() {
            return Ok(self.complete(agg, cancel, started).await);
        }

        let queue = order_by_cost(items, &cost);
        until_cancelled(self.sink.on_queued(&queue), cancel).await;
        let mut queue = queue.into_iter();

        if self.config.warm_up {
            until_cancelled(
                self.sink.on_progress(ProgressEvent::informational(WARM_UP_NOTE)),
                cancel,
            )
            .await;

            if let Some(first) = queue.next() {
                if cancel.is_cancelled() {
                    debug!("cancelled before warm-up");
                    return Ok(self.complete(agg, cancel, started).await);
                }

                until_cancelled(self.sink.on_item_start(&first), cancel).await;
                let report = run_guarded(first, |item| {
                    execute_item(item, processor.clone(), plan.budget.clone(), cancel.clone())
                })
                .await;
                match report {
                    WorkerReport::Completed(outcome) => {
                        let event = agg.record(outcome);
                        until_cancelled(self.sink.on_progress(event), cancel).await;
                    }
                    WorkerReport::NotStarted(item) => {
                        debug!(item = %item, "warm-up item not started");
                    }
                }

                if cancel.is_cancelled() {
                    debug!(processed = agg.processed(), "cancelled after warm-up, skipping fan-out");
                    return Ok(self.complete(agg, cancel, started).await);
                }
            }
        }

        let mut pool = WorkerPool::new(plan.pool_size);
        let mut submitted = 0usize;
        for item in queue {
            if cancel.is_cancelled() {
                debug!(submitted, "cancellation observed, no further submissions");
                break;
            }
            until_cancelled(self.sink.on_item_start(&item), cancel).await;
            let processor = processor.clone();
            let budget = plan.budget.clone();
            let token = cancel.clone();
            pool.submit(item, cancel.clone(), move |item| {
                execute_item(item, processor, budget, token)
            });
            submitted += 1;
        }
        debug!(submitted, pool_size = pool.size(), "fan-out submitted");

        let mut lost: Option<String> = None;
        for _ in 0..submitted {
            match pool.next_completed(cancel).await {
                Collected::Report(WorkerReport::Completed(outcome)) => {
                    let event = agg.record(outcome);
                    until_cancelled(self.sink.on_progress(event), cancel).await;
                }
                Collected::Report(WorkerReport::NotStarted(item)) => {
                    debug!(item = %item, "item skipped after cancellation");
                }
                Collected::Lost(e) => {
                    tracing::warn!(error = %e, "worker task ended without a report");
                    lost = Some(e.to_string());
                }
                Collected::Cancelled => {
                    debug!(processed = agg.processed(), "collection interrupted by cancellation");
                    break;
                }
                Collected::Exhausted => break,
            }
        }

        // Every task has been joined; anything still unreported never finished.
        if let Some(reason) = lost.filter(|_| pool.outstanding() == 0) {
            for item in pool.take_unreported() {
                let outcome = ItemOutcome::failed(item, format!("Execution error: {}", reason));
                let event = agg.record(outcome);
                until_cancelled(self.sink.on_progress(event), cancel).await;
            }
        }

        if cancel.is_cancelled() || pool.outstanding() > 0 {
            pool.shutdown(self.config.shutdown_grace).await;
        }

        Ok(self.complete(agg, cancel, started).await)
    }

    async fn complete(
        &self,
        agg: Aggregator<I>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> BatchResult<I> {
        let processed = agg.processed();
        let total = agg.total();
        // Cancelled only matters if it cut the run short.
        let cancelled = cancel.is_cancelled() && processed < total;
        let result = agg.finish(cancelled, self.config.output_mode, started.elapsed());
        debug!(
            reason = ?result.stop_reason,
            processed = result.processed,
            total = result.total,
            failures = result.failures.len(),
            "batch complete"
        );
        self.sink.on_complete(&result).await;
        result
    }
}
