//! 弹性模式模块：提供按分钟计量的令牌桶预算。
//!
//! # Resilience Primitives Module
//!
//! Throughput control for batches that talk to a metered backend.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_budget::RateBudget`] | Token bucket capping spend per 60-second window |
//! | [`rate_budget::AcquireError`] | Cancellation raised out of a budget wait |
//!
//! ## Rate Budget
//!
//! The budget starts full and refills continuously. `acquire` suspends until the
//! requested amount fits; a cancelled token ends the wait without spending anything.
//!
//! ```rust
//! use batch_forge::resilience::rate_budget::RateBudget;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let budget = RateBudget::per_minute(40_000).unwrap();
//! let cancel = CancellationToken::new();
//!
//! // Spend the estimated prompt size before calling the model
//! budget.acquire(1_200, &cancel).await.unwrap();
//! # });
//! ```

pub mod rate_budget;

pub use rate_budget::{AcquireError, RateBudget, RateBudgetSnapshot};
