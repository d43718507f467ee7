//! JSON-file-backed result store.
//!
//! Records live in one JSON document keyed by `config_id` then `url`. The
//! whole file is rewritten through a temp file on every upsert; crawl
//! volumes are small enough that simplicity wins here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ResultStore, UpsertOutcome};
use crate::error::{Result, ScrapeError};
use crate::models::ScrapedRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    data: serde_json::Value,
    scraped_at: chrono::DateTime<chrono::Utc>,
}

type StoreDocument = BTreeMap<String, BTreeMap<String, StoredRecord>>;

/// Result store persisting to a single JSON file.
pub struct JsonFileResultStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles against the file.
    write_lock: Mutex<()>,
}

impl JsonFileResultStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| ScrapeError::Storage(format!("reading {}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ScrapeError::Storage(format!("parsing {}: {e}", self.path.display())))
    }

    fn save(&self, document: &StoreDocument) -> Result<()> {
        let raw = serde_json::to_string_pretty(document)
            .map_err(|e| ScrapeError::Storage(format!("encoding results: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| ScrapeError::Storage(format!("writing {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ScrapeError::Storage(format!("replacing {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl ResultStore for JsonFileResultStore {
    async fn bulk_upsert(&self, records: Vec<ScrapedRecord>) -> Result<UpsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load()?;
        let mut outcome = UpsertOutcome::default();

        for record in records {
            let entry = StoredRecord {
                data: record.data,
                scraped_at: record.scraped_at,
            };
            let existing = document
                .entry(record.config_id)
                .or_default()
                .insert(record.url, entry);
            if existing.is_some() {
                outcome.modified_count += 1;
            } else {
                outcome.upserted_count += 1;
            }
        }

        self.save(&document)?;
        debug!(
            "persisted results to {} ({} new, {} updated)",
            self.path.display(),
            outcome.upserted_count,
            outcome.modified_count
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(url: &str, data: serde_json::Value) -> ScrapedRecord {
        ScrapedRecord {
            config_id: "cfg".to_string(),
            url: url.to_string(),
            data,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upserts_survive_reopening_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("results.json");

        let store = JsonFileResultStore::new(path.clone());
        let outcome = store
            .bulk_upsert(vec![record("https://a.com/p/1", json!({"title": "One"}))])
            .await
            .expect("upsert succeeds");
        assert_eq!(outcome.upserted_count, 1);

        // A fresh handle over the same file sees the record and updates it
        // in place.
        let reopened = JsonFileResultStore::new(path);
        let outcome = reopened
            .bulk_upsert(vec![record("https://a.com/p/1", json!({"title": "One v2"}))])
            .await
            .expect("upsert succeeds");
        assert_eq!(outcome.upserted_count, 0);
        assert_eq!(outcome.modified_count, 1);
    }

    #[tokio::test]
    async fn distinct_urls_accumulate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = JsonFileResultStore::new(dir.path().join("results.json"));

        store
            .bulk_upsert(vec![
                record("https://a.com/p/1", json!({})),
                record("https://a.com/p/2", json!({})),
            ])
            .await
            .expect("upsert succeeds");
        let outcome = store
            .bulk_upsert(vec![record("https://a.com/p/3", json!({}))])
            .await
            .expect("upsert succeeds");
        assert_eq!(outcome.upserted_count, 1);

        let document = store.load().expect("file parses");
        assert_eq!(document["cfg"].len(), 3);
    }
}
