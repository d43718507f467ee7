//! Engine settings: pool sizing, timeouts, and browser launch options.
//!
//! Settings are read once at startup from a TOML file (every field
//! optional) and handed to the pool and the scrape service by value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing and acquisition policy for the browser pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Hard ceiling on concurrently running browser processes.
    pub max_pool_size: usize,
    /// Browsers launched eagerly at startup and kept through maintenance.
    pub min_pool_size: usize,
    /// Idle duration after which a browser becomes eligible for eviction.
    pub idle_timeout_ms: u64,
    /// Number of 2s polls a saturated acquisition waits before failing.
    pub retry_limit: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 5,
            min_pool_size: 2,
            idle_timeout_ms: 60_000,
            retry_limit: 3,
        }
    }
}

impl PoolOptions {
    /// Check the sizing invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_pool_size < 1 {
            return Err("max_pool_size must be at least 1".into());
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(format!(
                "min_pool_size ({}) must not exceed max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            ));
        }
        if self.idle_timeout_ms < 10_000 {
            return Err("idle_timeout_ms must be at least 10000".into());
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Maintenance cadence: half the idle timeout, floored at 30s.
    pub fn maintenance_interval(&self) -> Duration {
        self.idle_timeout().max(Duration::from_secs(60)) / 2
    }
}

/// Process-wide engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub pool: PoolOptions,
    /// Upper bound on a single `page.goto`.
    pub navigation_timeout_ms: u64,
    /// Upper bound on the post-navigation ready-state wait.
    pub page_ready_timeout_ms: u64,
    /// Fixed settle delay applied to list pages before interaction.
    pub list_settle_delay_ms: u64,
    pub headless: bool,
    /// Explicit Chrome/Chromium binary; discovered from well-known
    /// locations when unset.
    pub chrome_executable: Option<PathBuf>,
    /// Extra arguments appended to the launch command line.
    pub chrome_args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pool: PoolOptions::default(),
            navigation_timeout_ms: 30_000,
            page_ready_timeout_ms: 10_000,
            list_settle_delay_ms: 3_000,
            headless: true,
            chrome_executable: None,
            chrome_args: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file, falling back to defaults when no
    /// path is given or the file does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            Some(path) => {
                anyhow::bail!("settings file not found: {}", path.display());
            }
            None => Self::default(),
        };
        settings
            .pool
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid pool settings: {reason}"))?;
        Ok(settings)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.page_ready_timeout_ms)
    }

    pub fn list_settle_delay(&self) -> Duration {
        Duration::from_millis(self.list_settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.pool.max_pool_size, 5);
        assert_eq!(settings.pool.min_pool_size, 2);
        assert_eq!(settings.pool.idle_timeout_ms, 60_000);
        assert_eq!(settings.pool.retry_limit, 3);
        assert!(settings.headless);
        assert!(settings.pool.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let settings: EngineSettings = toml::from_str(
            r#"
            navigation_timeout_ms = 15000

            [pool]
            max_pool_size = 2
            min_pool_size = 1
            "#,
        )
        .expect("partial settings parse");
        assert_eq!(settings.pool.max_pool_size, 2);
        assert_eq!(settings.pool.min_pool_size, 1);
        assert_eq!(settings.pool.idle_timeout_ms, 60_000);
        assert_eq!(settings.navigation_timeout_ms, 15_000);
    }

    #[test]
    fn min_above_max_is_rejected() {
        let options = PoolOptions {
            max_pool_size: 2,
            min_pool_size: 3,
            ..PoolOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn maintenance_interval_floors_at_thirty_seconds() {
        let mut options = PoolOptions {
            idle_timeout_ms: 10_000,
            ..PoolOptions::default()
        };
        assert_eq!(options.maintenance_interval(), Duration::from_secs(30));
        options.idle_timeout_ms = 120_000;
        assert_eq!(options.maintenance_interval(), Duration::from_secs(60));
    }
}
