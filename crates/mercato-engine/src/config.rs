//! # Engine Configuration
//!
//! Knobs the gateway and the day-close service read at runtime. The API
//! binary embeds these sections in its own TOML file:
//!
//! ```toml
//! [idempotency]
//! in_progress_timeout_secs = 120
//! retention_days = 30
//! store_business_rejections = false
//!
//! [day_close]
//! force_close_mode = "auto_close"  # auto_close | ignore
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};

use mercato_core::machines::day_close::ForceCloseMode;

/// How long a claim may sit `in_progress` before another identical request
/// may take it over.
pub const DEFAULT_IN_PROGRESS_TIMEOUT_SECS: u64 = 120;

/// Completed records older than this are pruned.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencySettings {
    #[serde(default = "default_in_progress_timeout")]
    pub in_progress_timeout_secs: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Store 422 rejections as the completed response so a retry replays
    /// the rejection instead of re-running the transition.
    #[serde(default)]
    pub store_business_rejections: bool,
}

fn default_in_progress_timeout() -> u64 {
    DEFAULT_IN_PROGRESS_TIMEOUT_SECS
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        IdempotencySettings {
            in_progress_timeout_secs: DEFAULT_IN_PROGRESS_TIMEOUT_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            store_business_rejections: false,
        }
    }
}

impl IdempotencySettings {
    pub fn in_progress_timeout(&self) -> Duration {
        let secs = i64::try_from(self.in_progress_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1_000))
    }

    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCloseSettings {
    /// Used when a forced close request does not name a mode.
    #[serde(default)]
    pub force_close_mode: ForceCloseMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub idempotency: IdempotencySettings,

    #[serde(default)]
    pub day_close: DayCloseSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_business_rejections(mut self, store: bool) -> Self {
        self.idempotency.store_business_rejections = store;
        self
    }

    pub fn in_progress_timeout_secs(mut self, secs: u64) -> Self {
        self.idempotency.in_progress_timeout_secs = secs;
        self
    }

    pub fn force_close_mode(mut self, mode: ForceCloseMode) -> Self {
        self.day_close.force_close_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.idempotency.in_progress_timeout_secs, 120);
        assert_eq!(config.idempotency.retention(), Duration::days(30));
        assert!(!config.idempotency.store_business_rejections);
        assert_eq!(config.day_close.force_close_mode, ForceCloseMode::AutoClose);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let json = r#"{"idempotency": {"store_business_rejections": true},
                       "day_close": {"force_close_mode": "ignore"}}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(config.idempotency.store_business_rejections);
        assert_eq!(config.idempotency.retention_days, 30);
        assert_eq!(config.day_close.force_close_mode, ForceCloseMode::Ignore);
    }
}
