//! Cache configuration.
//!
//! Controls the memory budget and freshness window via `imageboard.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_BUDGET_MB: u64 = 128;
const DEFAULT_FRESHNESS_MS: u64 = 1000;

/// Cache configuration from the `[cache]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve views through the content cache. When off every request
    /// regenerates its content.
    pub enabled: bool,
    /// Memory budget in megabytes before least recently used entries are evicted.
    pub budget_mb: u64,
    /// How long (ms) a checked entry is served without asking for its counter.
    pub freshness_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_mb: DEFAULT_BUDGET_MB,
            freshness_ms: DEFAULT_FRESHNESS_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            budget_mb: settings.budget_mb,
            freshness_ms: settings.freshness.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    /// Budget converted to bytes, the unit entries are accounted in.
    pub fn budget_bytes(&self) -> u64 {
        megabytes_to_bytes(self.budget_mb)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

pub(crate) fn megabytes_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1 << 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.budget_mb, 128);
        assert_eq!(config.freshness_window(), Duration::from_secs(1));
    }

    #[test]
    fn budget_is_accounted_in_bytes() {
        let config = CacheConfig {
            budget_mb: 3,
            ..Default::default()
        };
        assert_eq!(config.budget_bytes(), 3 * 1024 * 1024);
    }

    #[test]
    fn huge_budget_saturates() {
        assert_eq!(megabytes_to_bytes(u64::MAX), u64::MAX);
    }
}
