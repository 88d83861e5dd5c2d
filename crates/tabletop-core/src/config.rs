//! Engine configuration
//!
//! Every tunable lives in [`EngineConfig`]. Defaults are usable as-is; a JSON
//! file can override any subset of fields, and the CLI layers its flags on
//! top of that.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TabletopError, TabletopResult};

/// Tunables shared by the registry, gateway, reconciler and token layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub life_min: i32,
    pub life_max: i32,
    pub starting_life: i32,
    /// Released sessions idle longer than this are evicted
    pub idle_session_ttl_secs: u64,
    /// Pending intents older than this are dropped as failed
    pub intent_retry_window_secs: u64,
    /// Replays without the authoritative state catching up before an intent is dropped
    pub max_intent_attempts: u32,
    /// Queued mutations older than this are discarded instead of flushed
    pub pending_mutation_max_age_secs: u64,
    pub token_skew_ms: u64,
    /// A cached join token younger than this is reused instead of refetched
    pub token_reuse_window_secs: u64,
    pub audit_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            life_min: -999,
            life_max: 999,
            starting_life: 40,
            idle_session_ttl_secs: 300,
            intent_retry_window_secs: 30,
            max_intent_attempts: 20,
            pending_mutation_max_age_secs: 30,
            token_skew_ms: 30_000,
            token_reuse_window_secs: 300,
            audit_capacity: 512,
        }
    }
}

impl EngineConfig {
    /// Load overrides from a JSON file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> TabletopResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> TabletopResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TabletopResult<()> {
        if self.life_min > self.life_max {
            return Err(TabletopError::Validation(format!(
                "lifeMin {} exceeds lifeMax {}",
                self.life_min, self.life_max
            )));
        }
        if !self.life_bounds().contains(&self.starting_life) {
            return Err(TabletopError::Validation(format!(
                "startingLife {} outside life bounds",
                self.starting_life
            )));
        }
        if self.audit_capacity == 0 {
            return Err(TabletopError::Validation("auditCapacity must be positive".into()));
        }
        Ok(())
    }

    pub fn life_bounds(&self) -> RangeInclusive<i32> {
        self.life_min..=self.life_max
    }

    pub fn idle_session_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_session_ttl_secs)
    }

    pub fn intent_retry_window(&self) -> Duration {
        Duration::from_secs(self.intent_retry_window_secs)
    }

    pub fn pending_mutation_max_age(&self) -> Duration {
        Duration::from_secs(self.pending_mutation_max_age_secs)
    }

    pub fn token_reuse_window(&self) -> Duration {
        Duration::from_secs(self.token_reuse_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.life_bounds(), -999..=999);
        assert_eq!(config.idle_session_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"lifeMax": 100, "startingLife": 20}"#).unwrap();
        assert_eq!(config.life_max, 100);
        assert_eq!(config.starting_life, 20);
        assert_eq!(config.life_min, -999);
    }

    #[test]
    fn test_inverted_life_bounds_rejected() {
        let result = EngineConfig::from_json(r#"{"lifeMin": 10, "lifeMax": 0, "startingLife": 5}"#);
        assert!(matches!(result, Err(TabletopError::Validation(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"idleSessionTtlSecs": 5}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.idle_session_ttl(), Duration::from_secs(5));
    }
}
