// Dispatch configuration

use super::constants::*;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine tuning knobs (the `[dispatch]` config section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Worker pool size per dispatch
    pub max_concurrency: usize,
    /// Per-target timeout in milliseconds
    pub target_timeout_ms: u64,
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            target_timeout_ms: DEFAULT_TARGET_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl DispatchConfig {
    pub fn target_timeout(&self) -> Duration {
        Duration::from_millis(self.target_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(AppError::Config(
                "dispatch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.target_timeout_ms == 0 {
            return Err(AppError::Config(
                "dispatch.target_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "dispatch.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
