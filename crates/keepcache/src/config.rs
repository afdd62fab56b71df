//! Cache manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`CacheManager`](crate::CacheManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Delay between two sweep passes, in milliseconds
    pub sweep_interval_ms: u64,
    /// Log a stats snapshot after every sweep pass
    pub log_stats: bool,
    /// Pending scope events buffered per subscriber
    pub scope_event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 1000,
            log_stats: true,
            scope_event_capacity: 64,
        }
    }
}

impl CacheConfig {
    /// Sweep interval; never zero
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert!(config.log_stats);
    }

    #[test]
    fn test_partial_json() {
        let config: CacheConfig = serde_json::from_str(r#"{ "sweep_interval_ms": 250 }"#).unwrap();

        assert_eq!(config.sweep_interval_ms, 250);
        assert!(config.log_stats);
        assert_eq!(config.scope_event_capacity, 64);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = CacheConfig {
            sweep_interval_ms: 0,
            ..CacheConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
    }
}
