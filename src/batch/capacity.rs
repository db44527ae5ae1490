//! Capacity descriptors and worker-pool sizing.

use crate::resilience::RateBudget;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pool size used when a rate budget, not the pool, is the real throttle.
pub const OVERSUBSCRIBED_POOL_SIZE: usize = 100;

/// The one limit a backend imposes on a batch.
///
/// The two models are not interchangeable: one caps simultaneous work, the other
/// caps cumulative spend over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// At most this many calls in flight at once.
    MaxConcurrent(u32),
    /// At most this many spend units (tokens) per 60 seconds.
    TokensPerMinute(u32),
}

impl Capacity {
    /// Read the capacity from `FORGE_MAX_CONCURRENT` / `FORGE_TOKENS_PER_MINUTE`.
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| -> Result<Option<u32>> {
            match std::env::var(name) {
                Ok(raw) => raw.trim().parse::<u32>().map(Some).map_err(|e| {
                    Error::configuration_with_context(
                        format!("invalid value {:?}", raw),
                        ErrorContext::new()
                            .with_field_path(name)
                            .with_details(e.to_string())
                            .with_source("capacity_env"),
                    )
                }),
                Err(_) => Ok(None),
            }
        };
        ModelCapacity {
            max_concurrent_requests: read("FORGE_MAX_CONCURRENT")?,
            tokens_per_minute: read("FORGE_TOKENS_PER_MINUTE")?,
        }
        .into_capacity()
    }
}

/// Limits as a model capability source publishes them (either field may be absent).
///
/// ```rust
/// use batch_forge::batch::{Capacity, ModelCapacity};
///
/// let raw = "tokens_per_minute: 40000\n";
/// let caps: ModelCapacity = serde_yaml::from_str(raw).unwrap();
/// assert_eq!(caps.into_capacity().unwrap(), Capacity::TokensPerMinute(40_000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapacity {
    #[serde(default)]
    pub max_concurrent_requests: Option<u32>,
    #[serde(default)]
    pub tokens_per_minute: Option<u32>,
}

impl ModelCapacity {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Exactly one limit must be present.
    pub fn into_capacity(self) -> Result<Capacity> {
        match (self.max_concurrent_requests, self.tokens_per_minute) {
            (Some(n), None) => Ok(Capacity::MaxConcurrent(n)),
            (None, Some(tpm)) => Ok(Capacity::TokensPerMinute(tpm)),
            (None, None) => Err(Error::configuration_with_context(
                "neither max_concurrent_requests nor tokens_per_minute is defined",
                ErrorContext::new()
                    .with_field_path("capacity")
                    .with_source("concurrency_plan"),
            )),
            (Some(n), Some(tpm)) => Err(Error::configuration_with_context(
                "max_concurrent_requests and tokens_per_minute are mutually exclusive",
                ErrorContext::new()
                    .with_field_path("capacity")
                    .with_details(format!(
                        "max_concurrent_requests={}, tokens_per_minute={}",
                        n, tpm
                    ))
                    .with_source("concurrency_plan"),
            )),
        }
    }
}

impl From<Capacity> for ModelCapacity {
    fn from(c: Capacity) -> Self {
        match c {
            Capacity::MaxConcurrent(n) => Self {
                max_concurrent_requests: Some(n),
                tokens_per_minute: None,
            },
            Capacity::TokensPerMinute(tpm) => Self {
                max_concurrent_requests: None,
                tokens_per_minute: Some(tpm),
            },
        }
    }
}

/// The sizing decision for one batch run.
#[derive(Debug, Clone)]
pub struct ConcurrencyPlan {
    pub pool_size: usize,
    /// Present only under the rate-budget model.
    pub budget: Option<Arc<RateBudget>>,
}

impl ConcurrencyPlan {
    /// Size the pool for `item_count` items under `capacity`.
    pub fn configure(capacity: Capacity, item_count: usize) -> Result<Self> {
        Self::configure_with(capacity, item_count, OVERSUBSCRIBED_POOL_SIZE)
    }

    pub(crate) fn configure_with(
        capacity: Capacity,
        item_count: usize,
        oversubscribed: usize,
    ) -> Result<Self> {
        match capacity {
            Capacity::MaxConcurrent(0) => Err(Error::configuration_with_context(
                "max_concurrent_requests must be positive",
                ErrorContext::new()
                    .with_field_path("max_concurrent_requests")
                    .with_source("concurrency_plan"),
            )),
            Capacity::MaxConcurrent(n) => Ok(Self {
                pool_size: (n as usize).min(item_count.max(1)),
                budget: None,
            }),
            Capacity::TokensPerMinute(tpm) => Ok(Self {
                pool_size: oversubscribed.max(1),
                budget: Some(Arc::new(RateBudget::per_minute(tpm)?)),
            }),
        }
    }

    pub fn is_rate_budgeted(&self) -> bool {
        self.budget.is_some()
    }
}
