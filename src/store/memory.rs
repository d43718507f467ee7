//! In-memory stores, used by tests and as the default result sink.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConfigStore, ResultStore, UpsertOutcome};
use crate::error::Result;
use crate::models::{ScrapedRecord, ScraperConfiguration};

/// Configurations held in memory, keyed by id.
#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<String, ScraperConfiguration>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, config: ScraperConfiguration) {
        self.configs.write().await.insert(config.id.clone(), config);
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ScraperConfiguration>> {
        Ok(self.configs.read().await.get(id).cloned())
    }

    async fn find_enabled_for_schedule(&self) -> Result<Vec<ScraperConfiguration>> {
        Ok(self
            .configs
            .read()
            .await
            .values()
            .filter(|config| config.cron_enabled)
            .cloned()
            .collect())
    }
}

/// Results held in memory, unique on `(config_id, url)`.
#[derive(Default)]
pub struct InMemoryResultStore {
    records: RwLock<HashMap<(String, String), ScrapedRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, for assertions and tooling.
    pub async fn records(&self) -> Vec<ScrapedRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn bulk_upsert(&self, records: Vec<ScrapedRecord>) -> Result<UpsertOutcome> {
        let mut stored = self.records.write().await;
        let mut outcome = UpsertOutcome::default();
        for record in records {
            let key = (record.config_id.clone(), record.url.clone());
            if stored.insert(key, record).is_some() {
                outcome.modified_count += 1;
            } else {
                outcome.upserted_count += 1;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(config_id: &str, url: &str, data: serde_json::Value) -> ScrapedRecord {
        ScrapedRecord {
            config_id: config_id.to_string(),
            url: url.to_string(),
            data,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn repeated_upsert_keeps_one_record_per_key() {
        let store = InMemoryResultStore::new();

        let first = store
            .bulk_upsert(vec![record("cfg", "https://a.com/p/1", json!({"v": 1}))])
            .await
            .expect("upsert succeeds");
        assert_eq!(first.upserted_count, 1);
        assert_eq!(first.modified_count, 0);

        let second = store
            .bulk_upsert(vec![record("cfg", "https://a.com/p/1", json!({"v": 2}))])
            .await
            .expect("upsert succeeds");
        assert_eq!(second.upserted_count, 0);
        assert_eq!(second.modified_count, 1);

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn same_url_under_different_configs_is_two_records() {
        let store = InMemoryResultStore::new();
        store
            .bulk_upsert(vec![
                record("cfg-a", "https://a.com/p/1", json!({})),
                record("cfg-b", "https://a.com/p/1", json!({})),
            ])
            .await
            .expect("upsert succeeds");
        assert_eq!(store.records().await.len(), 2);
    }

    #[tokio::test]
    async fn schedule_query_returns_only_cron_enabled() {
        let store = InMemoryConfigStore::new();
        let mut enabled: ScraperConfiguration = serde_json::from_value(json!({
            "id": "on",
            "startUrls": ["https://a.com"],
            "pageType": "ListPage",
            "itemSelector": ".item",
            "fieldMappings": [{"fieldName": "t", "selector": "h2", "extractFrom": "text"}],
            "cronEnabled": true
        }))
        .expect("config deserializes");
        store.insert(enabled.clone()).await;
        enabled.id = "off".to_string();
        enabled.cron_enabled = false;
        store.insert(enabled).await;

        let scheduled = store
            .find_enabled_for_schedule()
            .await
            .expect("query succeeds");
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, "on");
    }
}
