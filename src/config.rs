//! Engine configuration

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default quiescence delay after an input batch ends
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(400);

/// Default window in which consecutive edits share one undo entry
pub const DEFAULT_HISTORY_DELAY: Duration = Duration::from_millis(1000);

/// Default undo stack depth
pub const DEFAULT_MAX_STACK: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Coalescing window in milliseconds
    pub delay_ms: u64,
    pub max_stack: usize,
    /// Only record edits coming from the user path
    pub user_only: bool,
}

impl HistoryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_HISTORY_DELAY.as_millis() as u64,
            max_stack: DEFAULT_MAX_STACK,
            user_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between a batch end and its flush, in milliseconds
    pub quiescence_ms: u64,
    /// Delay between an edit outside any batch and its flush, in milliseconds
    pub idle_flush_ms: u64,
    pub history: HistoryConfig,
}

impl EngineConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.max_stack == 0 {
            return Err(SyncError::Config(
                "history.max_stack must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn idle_flush(&self) -> Duration {
        Duration::from_millis(self.idle_flush_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: DEFAULT_QUIESCENCE.as_millis() as u64,
            idle_flush_ms: 0,
            history: HistoryConfig::default(),
        }
    }
}
