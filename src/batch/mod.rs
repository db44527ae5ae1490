//! 批处理编排模块：在单一容量限制下并发执行一批条目。
//!
//! # Batch Orchestration Module
//!
//! Runs one processor over many items (typically files) against a backend that
//! imposes exactly one limit: either a cap on concurrent calls or a spend budget
//! per minute.
//!
//! ## Overview
//!
//! A run goes through these phases:
//! - Choose the concurrency model from the [`Capacity`]
//! - Order items cheapest first
//! - Run the cheapest item alone (warm-up) so a shared prompt prefix is cached
//! - Fan the rest out to a bounded worker pool, collecting in completion order
//! - Reduce every outcome into a single [`BatchResult`]
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchExecutor`] | Orchestrates one run from configuration to result |
//! | [`ItemProcessor`] | The per-item transformation |
//! | [`Capacity`] | Concurrency cap or tokens-per-minute budget |
//! | [`ConcurrencyPlan`] | Pool size and optional rate budget derived from a capacity |
//! | [`BatchConfig`] | Output mode, warm-up, shutdown grace, buffer sizes |
//! | [`ProgressSink`] | Lifecycle listener for UIs and tests |
//! | [`BatchResult`] | Stop reason, failures, aggregated output |
//!
//! ## Example
//!
//! ```rust
//! use batch_forge::batch::{BatchConfig, BatchExecutor, Capacity, FnProcessor, ItemOutput};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let executor = BatchExecutor::new(Capacity::MaxConcurrent(4), BatchConfig::default());
//! let processor = Arc::new(FnProcessor::new(|name: String| async move {
//!     Ok::<_, batch_forge::Error>(ItemOutput::success(format!("checked {}", name)))
//! }));
//!
//! let items = vec!["b.rs".to_string(), "a.rs".to_string()];
//! let result = executor
//!     .run(items, |i: &String| Ok(i.len() as u64), processor, &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert!(result.is_success());
//! assert_eq!(result.processed, 2);
//! # });
//! ```

mod capacity;
mod collector;
mod config;
mod executor;
mod outcome;
mod progress;
mod schedule;

pub use capacity::{Capacity, ConcurrencyPlan, ModelCapacity, OVERSUBSCRIBED_POOL_SIZE};
pub use config::{BatchConfig, DEFAULT_PROGRESS_BUFFER, DEFAULT_SHUTDOWN_GRACE};
pub use executor::{BatchExecutor, FnProcessor, ItemProcessor, WARM_UP_NOTE};
pub use outcome::{
    BatchResult, ItemOutcome, ItemOutput, OutputMode, StopReason, CANCELLED_EXPLANATION,
};
pub use progress::{
    ChannelProgressSink, InMemoryProgressSink, NoopProgressSink, ProgressEvent, ProgressSink,
};
pub use schedule::{file_size_cost, order_by_cost, resolve_cost, UNKNOWN_COST};
