//! Batch run configuration.

use super::capacity::OVERSUBSCRIBED_POOL_SIZE;
use super::outcome::OutputMode;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
pub const DEFAULT_PROGRESS_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub output_mode: OutputMode,
    /// Run the cheapest item alone before fanning out.
    pub warm_up: bool,
    /// How long a cancelled run waits for outstanding workers before aborting them.
    #[serde(with = "duration_ms", rename = "shutdown_grace_ms")]
    pub shutdown_grace: Duration,
    /// Capacity of the channel created by `BatchExecutor::with_progress_channel`.
    pub progress_buffer: usize,
    /// Pool size under the rate-budget model.
    pub oversubscribed_pool_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::All,
            warm_up: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
            oversubscribed_pool_size: OVERSUBSCRIBED_POOL_SIZE,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_output_mode(mut self, m: OutputMode) -> Self {
        self.output_mode = m;
        self
    }
    pub fn with_warm_up(mut self, w: bool) -> Self {
        self.warm_up = w;
        self
    }
    pub fn with_shutdown_grace(mut self, d: Duration) -> Self {
        self.shutdown_grace = d;
        self
    }
    pub fn with_progress_buffer(mut self, n: usize) -> Self {
        self.progress_buffer = n.max(1);
        self
    }
    pub fn with_oversubscribed_pool_size(mut self, n: usize) -> Self {
        self.oversubscribed_pool_size = n.max(1);
        self
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Defaults overridden by environment:
    /// - `FORGE_OUTPUT_MODE` (`none` | `all` | `changed`)
    /// - `FORGE_WARM_UP` (`0` disables)
    /// - `FORGE_SHUTDOWN_GRACE_MS`
    /// - `FORGE_PROGRESS_BUFFER`
    /// - `FORGE_POOL_SIZE` (oversubscribed pool size)
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("FORGE_OUTPUT_MODE") {
            cfg.output_mode = raw.parse()?;
        }
        if let Ok(raw) = std::env::var("FORGE_WARM_UP") {
            cfg.warm_up = raw.trim() != "0";
        }
        if let Some(ms) = env_number("FORGE_SHUTDOWN_GRACE_MS")? {
            cfg.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(n) = env_number("FORGE_PROGRESS_BUFFER")? {
            cfg = cfg.with_progress_buffer(n as usize);
        }
        if let Some(n) = env_number("FORGE_POOL_SIZE")? {
            cfg = cfg.with_oversubscribed_pool_size(n as usize);
        }
        Ok(cfg)
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid value {:?}", raw),
                ErrorContext::new()
                    .with_field_path(name)
                    .with_details(e.to_string())
                    .with_source("batch_config_env"),
            )
        }),
        Err(_) => Ok(None),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
