//! Directory-backed configuration store: one JSON document per job.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::ConfigStore;
use crate::error::{Result, ScrapeError};
use crate::models::ScraperConfiguration;

/// Reads job configurations from `*.json` files in one directory.
///
/// Files are re-read on every query, so edits (e.g. flipping
/// `cronEnabled`) are visible to the next scheduled run without a restart.
pub struct JsonDirConfigStore {
    dir: PathBuf,
}

impl JsonDirConfigStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Every configuration in the directory, sorted by id.
    pub fn all(&self) -> Result<Vec<ScraperConfiguration>> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| ScrapeError::Storage(format!("listing {}: {e}", self.dir.display())))?;

        let mut configs = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ScrapeError::Storage(format!("listing {}: {e}", self.dir.display())))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ScrapeError::Storage(format!("reading {}: {e}", path.display())))?;
            let config: ScraperConfiguration = serde_json::from_str(&raw)
                .map_err(|e| ScrapeError::Storage(format!("parsing {}: {e}", path.display())))?;
            configs.push(config);
        }
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("loaded {} configurations from {}", configs.len(), self.dir.display());
        Ok(configs)
    }
}

#[async_trait]
impl ConfigStore for JsonDirConfigStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ScraperConfiguration>> {
        Ok(self.all()?.into_iter().find(|config| config.id == id))
    }

    async fn find_enabled_for_schedule(&self) -> Result<Vec<ScraperConfiguration>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|config| config.cron_enabled)
            .collect())
    }
}
