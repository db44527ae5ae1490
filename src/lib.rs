//! # batch-forge
//!
//! 面向受限模型后端的批量编辑编排库：预热、并发扇出、速率预算与结果汇总。
//!
//! Concurrent batch orchestration for applying one model-driven transformation
//! to many items under a single backend capacity limit.
//!
//! ## Overview
//!
//! A backend either caps the number of calls in flight or meters spend (tokens)
//! per minute. This library picks the matching concurrency model, runs the
//! cheapest item first to warm any prompt cache, fans the rest out to a bounded
//! worker pool, and reduces every per-item outcome into one result. Progress is
//! reported through a pluggable sink and the whole run honors a cancellation token.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batch_forge::batch::{BatchConfig, BatchExecutor, Capacity, FnProcessor, ItemOutput};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> batch_forge::Result<()> {
//!     batch_forge::init_tracing();
//!
//!     let executor = BatchExecutor::new(Capacity::from_env()?, BatchConfig::from_env()?);
//!     let processor = Arc::new(FnProcessor::new(|path: String| async move {
//!         Ok::<_, batch_forge::Error>(ItemOutput::success(format!("edited {}", path)))
//!     }));
//!
//!     let files = vec!["src/main.rs".to_string(), "src/lib.rs".to_string()];
//!     let result = executor
//!         .run(files, |p: &String| batch_forge::batch::file_size_cost(p), processor, &CancellationToken::new())
//!         .await?;
//!     println!("{:?}: {}", result.stop_reason, result.explanation());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Orchestration: capacity, scheduling, worker pool, aggregation, progress |
//! | [`resilience`] | Per-minute token-bucket rate budget |
//! | [`tokens`] | Token estimation used for spend charges |
//! | [`error`] | Error type shared by every module |

pub mod batch;
pub mod resilience;
pub mod tokens;

pub use batch::{
    BatchConfig, BatchExecutor, BatchResult, Capacity, ItemOutput, ItemProcessor, ProgressEvent,
    ProgressSink, StopReason,
};
pub use resilience::RateBudget;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
