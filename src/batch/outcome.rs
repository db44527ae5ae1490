//! Per-item outcomes and the batch-level reduction.

use super::progress::ProgressEvent;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Explanation attached to a cancelled batch.
pub const CANCELLED_EXPLANATION: &str = "User cancelled operation.";

/// What a processor reports for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutput {
    pub error: Option<String>,
    /// Best-effort output, kept even on failure for diagnostics.
    pub payload: String,
    /// Whether the item was actually changed.
    pub edited: bool,
}

impl ItemOutput {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            error: None,
            payload: payload.into(),
            edited: false,
        }
    }

    pub fn failure(error: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            payload: payload.into(),
            edited: false,
        }
    }

    pub fn edited(mut self, edited: bool) -> Self {
        self.edited = edited;
        self
    }
}

/// Terminal state of one item: success when `error` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome<I> {
    pub item: I,
    pub error: Option<String>,
    pub payload: String,
    pub edited: bool,
}

impl<I> ItemOutcome<I> {
    pub fn from_output(item: I, output: ItemOutput) -> Self {
        Self {
            item,
            error: output.error,
            payload: output.payload,
            edited: output.edited,
        }
    }

    pub fn failed(item: I, error: impl Into<String>) -> Self {
        Self {
            item,
            error: Some(error.into()),
            payload: String::new(),
            edited: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Success,
    PartialFailure,
    Cancelled,
}

/// Which payloads make it into [`BatchResult::aggregated_output`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    None,
    #[default]
    All,
    /// Only items that reported `edited`.
    Changed,
}

impl OutputMode {
    fn admits<I>(&self, outcome: &ItemOutcome<I>) -> bool {
        match self {
            OutputMode::None => false,
            OutputMode::All => true,
            OutputMode::Changed => outcome.edited,
        }
    }
}

impl std::str::FromStr for OutputMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(OutputMode::None),
            "all" => Ok(OutputMode::All),
            "changed" => Ok(OutputMode::Changed),
            other => Err(crate::Error::validation_with_context(
                format!("unknown output mode {:?}", other),
                crate::ErrorContext::new()
                    .with_field_path("output_mode")
                    .with_details("expected one of: none, all, changed"),
            )),
        }
    }
}

/// The single terminal result of a batch run.
#[derive(Debug, Clone)]
pub struct BatchResult<I> {
    pub stop_reason: StopReason,
    /// Failing items with their errors, in completion order.
    pub failures: Vec<(I, String)>,
    pub aggregated_output: String,
    /// Items that reported an edit, in completion order.
    pub edited: Vec<I>,
    pub processed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl<I: Display> BatchResult<I> {
    pub fn is_success(&self) -> bool {
        self.stop_reason == StopReason::Success
    }

    /// Human-readable reason, empty on success.
    pub fn explanation(&self) -> String {
        match self.stop_reason {
            StopReason::Success => String::new(),
            StopReason::Cancelled => CANCELLED_EXPLANATION.to_string(),
            StopReason::PartialFailure => self
                .failures
                .iter()
                .map(|(item, err)| format!("{}: {}", item, err))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Monotonic progress counter plus the running set of captured outcomes.
pub(crate) struct Aggregator<I> {
    outcomes: Vec<ItemOutcome<I>>,
    processed: usize,
    total: usize,
}

impl<I: Clone + Display> Aggregator<I> {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(total),
            processed: 0,
            total,
        }
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Capture one terminal outcome and return the progress event it produces.
    pub(crate) fn record(&mut self, outcome: ItemOutcome<I>) -> ProgressEvent {
        self.processed += 1;
        let event = ProgressEvent::for_item(self.processed, &outcome.item, outcome.error.clone());
        self.outcomes.push(outcome);
        event
    }

    pub(crate) fn finish(self, cancelled: bool, mode: OutputMode, elapsed: Duration) -> BatchResult<I> {
        let failures: Vec<(I, String)> = self
            .outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| (o.item.clone(), e.clone())))
            .collect();

        let stop_reason = if cancelled {
            StopReason::Cancelled
        } else if failures.is_empty() {
            StopReason::Success
        } else {
            StopReason::PartialFailure
        };

        let aggregated_output = self
            .outcomes
            .iter()
            .filter(|o| !o.payload.trim().is_empty())
            .filter(|o| mode.admits(o))
            .map(|o| format!("## {}\n{}\n\n", o.item, o.payload))
            .collect::<String>();

        let edited = self
            .outcomes
            .iter()
            .filter(|o| o.edited)
            .map(|o| o.item.clone())
            .collect();

        BatchResult {
            stop_reason,
            failures,
            aggregated_output,
            edited,
            processed: self.processed,
            total: self.total,
            elapsed,
        }
    }
}
