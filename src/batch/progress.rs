//! Progress events and the listener interface the orchestrator reports through.

use super::outcome::{BatchResult, StopReason};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

/// One step of visible progress.
///
/// `processed_count` strictly increases over a run. The only event with a count of
/// zero is the informational one published before the warm-up item starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub processed_count: usize,
    /// Empty for informational events.
    pub item_label: String,
    /// Error text for a failed item, or a status line for informational events.
    pub note: Option<String>,
}

impl ProgressEvent {
    pub fn informational(note: impl Into<String>) -> Self {
        Self {
            processed_count: 0,
            item_label: String::new(),
            note: Some(note.into()),
        }
    }

    pub fn for_item(processed_count: usize, item: &impl Display, error: Option<String>) -> Self {
        Self {
            processed_count,
            item_label: item.to_string(),
            note: error,
        }
    }

    pub fn is_informational(&self) -> bool {
        self.item_label.is_empty()
    }
}

/// Lifecycle listener for a batch run. All methods default to no-ops.
///
/// Calls come from the orchestrating task only, never from workers, so
/// implementations see events in publication order.
#[async_trait]
pub trait ProgressSink<I: Send + Sync + 'static>: Send + Sync {
    async fn on_start(&self, _total: usize) {}

    /// The queue after cost ordering, before anything runs.
    async fn on_queued(&self, _queued: &[I]) {}

    async fn on_item_start(&self, _item: &I) {}

    async fn on_progress(&self, _event: ProgressEvent) {}

    /// Called exactly once per run that got past configuration.
    async fn on_complete(&self, _result: &BatchResult<I>) {}
}

/// Default sink (no reporting).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

#[async_trait]
impl<I: Send + Sync + 'static> ProgressSink<I> for NoopProgressSink {}

/// Forwards progress events onto a bounded channel for a UI loop to drain.
///
/// A full channel applies backpressure to the orchestrator until the consumer
/// catches up or the run is cancelled; a dropped receiver just discards events.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl<I: Send + Sync + 'static> ProgressSink<I> for ChannelProgressSink {
    async fn on_progress(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("progress receiver dropped, discarding event");
        }
    }
}

/// In-memory sink for testing.
pub struct InMemoryProgressSink {
    events: RwLock<Vec<ProgressEvent>>,
    queued: RwLock<Vec<String>>,
    started: RwLock<Vec<String>>,
    completions: RwLock<Vec<StopReason>>,
    total: RwLock<Option<usize>>,
}

impl InMemoryProgressSink {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            queued: RwLock::new(Vec::new()),
            started: RwLock::new(Vec::new()),
            completions: RwLock::new(Vec::new()),
            total: RwLock::new(None),
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events for finished items (informational events excluded).
    pub fn item_events(&self) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| !e.is_informational())
            .collect()
    }

    pub fn queued_labels(&self) -> Vec<String> {
        self.queued
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn started_labels(&self) -> Vec<String> {
        self.started
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn completions(&self) -> Vec<StopReason> {
        self.completions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total(&self) -> Option<usize> {
        *self.total.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I: Display + Send + Sync + 'static> ProgressSink<I> for InMemoryProgressSink {
    async fn on_start(&self, total: usize) {
        *self.total.write().unwrap_or_else(PoisonError::into_inner) = Some(total);
    }

    async fn on_queued(&self, queued: &[I]) {
        let mut labels = self.queued.write().unwrap_or_else(PoisonError::into_inner);
        labels.clear();
        labels.extend(queued.iter().map(|i| i.to_string()));
    }

    async fn on_item_start(&self, item: &I) {
        self.started
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item.to_string());
    }

    async fn on_progress(&self, event: ProgressEvent) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    async fn on_complete(&self, result: &BatchResult<I>) {
        self.completions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.stop_reason);
    }
}
