//! Token counter implementations.

use crate::Result;
use std::path::Path;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn count_all(&self, texts: &[&str]) -> usize {
        texts.iter().map(|t| self.count(t)).sum()
    }
}

#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}
impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }
    pub fn with_ratio(r: f64) -> Self {
        Self {
            chars_per_token: if r.is_finite() && r > 0.0 { r } else { 4.0 },
        }
    }
}
impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}
impl TokenCounter for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicEstimator {
    chars_per_token: f64,
}
impl AnthropicEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: 3.5,
        }
    }
}
impl Default for AnthropicEstimator {
    fn default() -> Self {
        Self::new()
    }
}
impl TokenCounter for AnthropicEstimator {
    fn count(&self, text: &str) -> usize {
        let base = (text.len() as f64 / self.chars_per_token).ceil() as usize;
        let ws = text.chars().filter(|c| c.is_whitespace()).count();
        base + (ws as f64 * 0.1) as usize
    }
}

/// Approximate prompt size for editing one file: the file itself plus any
/// shared context sent alongside it. Never less than 1.
pub fn estimate_file_tokens(
    path: impl AsRef<Path>,
    counter: &dyn TokenCounter,
    context: &[&str],
) -> Result<u64> {
    let body = std::fs::read_to_string(path.as_ref())?;
    Ok(estimate_text_tokens(&body, counter, context))
}

pub fn estimate_text_tokens(body: &str, counter: &dyn TokenCounter, context: &[&str]) -> u64 {
    let total = counter.count(body) + counter.count_all(context);
    total.max(1) as u64
}
