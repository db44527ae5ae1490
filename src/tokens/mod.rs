//! Token 估算模块：为速率预算提供每个条目的开销估计。
//!
//! # Token Estimation Module
//!
//! Budgeted runs charge each item against the rate budget before it runs. The
//! charge is an approximate token count of what will be sent to the model: the
//! item's own text plus whatever shared context travels with it.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenCounter`] | Trait for token counting implementations |
//! | [`CharacterEstimator`] | Fast character-based approximation (4 chars ≈ 1 token) |
//! | [`AnthropicEstimator`] | Anthropic-specific token estimation |
//! | [`estimate_file_tokens`] | Spend estimate for editing one file |
//!
//! ```rust
//! use batch_forge::tokens::{estimate_text_tokens, CharacterEstimator};
//!
//! let counter = CharacterEstimator::new();
//! let spend = estimate_text_tokens("fn main() {}", &counter, &["Rename main to run"]);
//! assert!(spend >= 1);
//! ```

mod counter;

pub use counter::{
    estimate_file_tokens, estimate_text_tokens, AnthropicEstimator, CharacterEstimator,
    TokenCounter,
};
