//! Store seams for configurations and results.
//!
//! The document database itself lives outside the engine; these traits are
//! the only contract. The bundled implementations (in-memory, JSON file)
//! keep the CLI and the test suite self-contained.

pub mod config_dir;
pub mod json_file;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ScrapedRecord, ScraperConfiguration};

pub use config_dir::JsonDirConfigStore;
pub use json_file::JsonFileResultStore;
pub use memory::{InMemoryConfigStore, InMemoryResultStore};

/// Read access to stored job configurations.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<ScraperConfiguration>>;

    /// Configurations whose `cronEnabled` flag is set, re-read on every
    /// call so the scheduler can re-validate just before a run.
    async fn find_enabled_for_schedule(&self) -> Result<Vec<ScraperConfiguration>>;
}

/// Counts reported by a bulk upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    /// Records inserted for the first time.
    pub upserted_count: usize,
    /// Records that replaced an existing `(config_id, url)` entry.
    pub modified_count: usize,
    pub write_errors: Vec<String>,
}

/// Write access to scraped results, unique on `(config_id, url)`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert-or-update every record; repeated writes for the same key
    /// must be idempotent apart from the refreshed `scraped_at`.
    async fn bulk_upsert(&self, records: Vec<ScrapedRecord>) -> Result<UpsertOutcome>;
}
