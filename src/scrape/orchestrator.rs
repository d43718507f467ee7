//! Job orchestration: walks start URLs, runs list/detail flows, schedules
//! detail sub-tasks under a pool-sized limiter, merges and persists.
//!
//! Error absorption follows the containment ladder: per-field and per-item
//! errors vanish locally, a detail page gets one bounded retry, a failed
//! list page empties only its branch, and a job always tries to persist
//! whatever it collected.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::Page;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::extract::{self, ListItem};
use super::{filter, interaction};
use crate::browser::BrowserPool;
use crate::config::EngineSettings;
use crate::error::{Result, ScrapeError};
use crate::models::{
    InteractionOptions, JobSummary, PageType, ProcessingResult, ScrapedRecord,
    ScraperConfiguration,
};
use crate::store::{ResultStore, UpsertOutcome};

/// Job-wide ceiling on detail pages, across both page types.
pub const MAX_DETAIL_PAGES_PER_JOB: usize = 100;

/// A failed detail page is retried this many times, 2s apart.
const DETAIL_RETRY_LIMIT: u32 = 1;
const DETAIL_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// State scoped to one `run_job` call.
struct JobState {
    /// Detail URLs claimed so far; a URL is claimed at most once and
    /// claiming happens before the task is scheduled.
    claimed: Mutex<HashSet<String>>,
    /// Admits at most `max_pool_size` page-holding tasks at a time.
    limiter: Arc<Semaphore>,
}

impl JobState {
    fn new(width: usize) -> Self {
        Self {
            claimed: Mutex::new(HashSet::new()),
            limiter: Arc::new(Semaphore::new(width)),
        }
    }

    fn claim(&self, url: &str) -> bool {
        let mut claimed = self.claimed.lock().expect("dedup lock poisoned");
        claim_url(&mut claimed, url, MAX_DETAIL_PAGES_PER_JOB)
    }
}

/// Check-then-insert claim of a detail URL under a job ceiling.
fn claim_url(claimed: &mut HashSet<String>, url: &str, ceiling: usize) -> bool {
    if claimed.contains(url) || claimed.len() >= ceiling {
        return false;
    }
    claimed.insert(url.to_string());
    true
}

/// Drives scrape jobs against a shared browser pool and result store.
///
/// Constructed once at startup and passed around explicitly; the pool is
/// initialized by the caller before the first job runs.
#[derive(Clone)]
pub struct ScrapeService {
    pool: Arc<BrowserPool>,
    results: Arc<dyn ResultStore>,
    settings: EngineSettings,
}

impl ScrapeService {
    pub fn new(
        pool: Arc<BrowserPool>,
        results: Arc<dyn ResultStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            results,
            settings,
        }
    }

    /// Run one configuration end to end and report its outcome.
    ///
    /// Never raises: orchestration failures are logged and whatever was
    /// collected is still handed to the result store.
    pub async fn run_job(&self, config: &ScraperConfiguration) -> JobSummary {
        let label = config.name.clone().unwrap_or_else(|| config.id.clone());
        info!(
            "starting job '{label}' ({} start urls, {:?})",
            config.start_urls.len(),
            config.page_type
        );

        if let Err(reason) = config.validate() {
            error!("job '{label}' rejected: {reason}");
            return JobSummary {
                config_id: config.id.clone(),
                success: false,
                results_count: 0,
                message: format!("invalid configuration: {reason}"),
            };
        }

        let job = Arc::new(JobState::new(self.pool.max_pool_size()));
        let collected = match config.page_type {
            PageType::ListPage => self.run_list_job(config, &job).await,
            PageType::DetailPage => self.run_detail_job(config, &job).await,
        };

        let collected_count = collected.len();
        let kept: Vec<ProcessingResult> = collected
            .into_iter()
            .filter(|result| {
                filter::passes_keyword_filter(&result.data, &config.keywords_to_filter_by)
            })
            .collect();
        if kept.len() < collected_count {
            debug!(
                "keyword filter dropped {} of {collected_count} results",
                collected_count - kept.len()
            );
        }

        let results_count = kept.len();
        match self.persist(config, kept).await {
            Ok(outcome) => {
                info!(
                    "job '{label}' finished: {results_count} results ({} new, {} updated)",
                    outcome.upserted_count, outcome.modified_count
                );
                JobSummary {
                    config_id: config.id.clone(),
                    success: true,
                    results_count,
                    message: format!(
                        "persisted {results_count} results ({} new, {} updated)",
                        outcome.upserted_count, outcome.modified_count
                    ),
                }
            }
            Err(e) => {
                error!("job '{label}' failed to persist results: {e}");
                JobSummary {
                    config_id: config.id.clone(),
                    success: false,
                    results_count,
                    message: format!("persistence failed: {e}"),
                }
            }
        }
    }

    /// Run several configurations concurrently; one job's failure never
    /// affects its siblings.
    pub async fn run_jobs(&self, configs: &[ScraperConfiguration]) -> Vec<JobSummary> {
        futures::future::join_all(configs.iter().map(|config| self.run_job(config))).await
    }

    async fn run_list_job(
        &self,
        config: &ScraperConfiguration,
        job: &Arc<JobState>,
    ) -> Vec<ProcessingResult> {
        let branches = config.start_urls.iter().map(|start_url| {
            let service = self.clone();
            let config = config.clone();
            let job = job.clone();
            let start_url = start_url.clone();
            async move {
                match service.process_list_page(&start_url, &config, &job).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!("list page {start_url} failed, dropping its branch: {e}");
                        Vec::new()
                    }
                }
            }
        });
        futures::future::join_all(branches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn run_detail_job(
        &self,
        config: &ScraperConfiguration,
        job: &Arc<JobState>,
    ) -> Vec<ProcessingResult> {
        let mut tasks = Vec::new();
        for start_url in &config.start_urls {
            if !job.claim(start_url) {
                debug!("skipping duplicate or over-ceiling detail url: {start_url}");
                continue;
            }
            tasks.push((
                start_url.clone(),
                self.spawn_detail_task(start_url.clone(), config.clone(), job.clone()),
            ));
        }

        let mut results = Vec::new();
        for (url, handle) in tasks {
            match handle.await {
                Ok(Some(data)) => results.push(ProcessingResult { url, data }),
                Ok(None) => {}
                Err(e) => warn!("detail task for {url} did not complete: {e}"),
            }
        }
        results
    }

    /// Spawn a claimed detail URL through the job limiter.
    fn spawn_detail_task(
        &self,
        url: String,
        config: ScraperConfiguration,
        job: Arc<JobState>,
    ) -> JoinHandle<Option<Value>> {
        let service = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = job.limiter.clone().acquire_owned().await else {
                return None;
            };
            service.process_detail_page(&url, &config).await
        })
    }

    /// Scrape one detail page with a bounded retry.
    ///
    /// Empty extraction is a `None`, not an error; an error consumes a
    /// retry after a short backoff, then the item is dropped.
    pub async fn process_detail_page(
        &self,
        url: &str,
        config: &ScraperConfiguration,
    ) -> Option<Value> {
        let attempts = DETAIL_RETRY_LIMIT + 1;
        for attempt in 1..=attempts {
            match self.scrape_detail_once(url, config).await {
                Ok(record) => return record,
                Err(e) => {
                    warn!("detail page {url} failed (attempt {attempt}/{attempts}): {e}");
                    if attempt < attempts {
                        tokio::time::sleep(DETAIL_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        None
    }

    async fn scrape_detail_once(
        &self,
        url: &str,
        config: &ScraperConfiguration,
    ) -> Result<Option<Value>> {
        let lease = self.pool.get_page(Some(url)).await?;
        let outcome = self.read_detail(lease.page(), url, config).await;
        // The page is released exactly once per attempt, on both paths.
        self.pool.release_page(lease).await;
        outcome
    }

    async fn read_detail(
        &self,
        page: &Page,
        url: &str,
        config: &ScraperConfiguration,
    ) -> Result<Option<Value>> {
        if let Some(wait) = &config.page_load_wait_options {
            interaction::apply_page_wait(page, wait).await;
        }
        interaction::close_popups(page, &config.close_popup_selectors).await;
        interaction::remove_excluded(page, &config.exclude_selectors).await;

        let html = page.content().await?;
        let base = parse_page_url(url)?;
        let root_selector = config
            .detail_item_selector
            .as_deref()
            .unwrap_or(&config.item_selector);
        let mappings = config
            .detail_field_mappings
            .as_deref()
            .unwrap_or(&config.field_mappings);
        extract::extract_detail_record(&html, &base, root_selector, mappings)
    }

    /// Scrape one list page: load, interact, extract, then fan out detail
    /// sub-tasks and merge their data back per item.
    async fn process_list_page(
        &self,
        start_url: &str,
        config: &ScraperConfiguration,
        job: &Arc<JobState>,
    ) -> Result<Vec<ProcessingResult>> {
        let base = parse_page_url(start_url)?;
        let interaction_options = config.interaction_options.clone().unwrap_or_default();

        // Page-holding phase runs under a limiter permit. Both the permit
        // and the page are released before detail tasks are awaited; holding
        // either across that await deadlocks a saturated pool.
        let html = {
            let Ok(_permit) = job.limiter.clone().acquire_owned().await else {
                return Err(ScrapeError::PoolShuttingDown);
            };
            let lease = self.pool.get_page(Some(start_url)).await?;
            let html = self
                .read_list_html(lease.page(), config, &interaction_options)
                .await;
            self.pool.release_page(lease).await;
            html?
        };

        let mut items =
            extract::extract_list_items(&html, &base, &config.item_selector, &config.field_mappings)?;
        if let Some(max_items) = interaction_options.max_items_to_scrape {
            if items.len() > max_items {
                debug!("truncating {} items to {max_items}", items.len());
                items.truncate(max_items);
            }
        }
        info!("{start_url}: extracted {} list items", items.len());

        let mut detail_tasks: Vec<(String, JoinHandle<Option<Value>>)> = Vec::new();
        if config.scrape_details_from_list {
            for item in &items {
                let Some(detail_url) = item.detail_url.as_deref() else {
                    continue;
                };
                if !job.claim(detail_url) {
                    debug!("detail url already claimed or ceiling reached: {detail_url}");
                    continue;
                }
                detail_tasks.push((
                    detail_url.to_string(),
                    self.spawn_detail_task(detail_url.to_string(), config.clone(), job.clone()),
                ));
            }
        }

        let mut detail_data: HashMap<String, Value> = HashMap::new();
        for (url, handle) in detail_tasks {
            match handle.await {
                Ok(Some(data)) => {
                    detail_data.insert(url, data);
                }
                Ok(None) => {}
                Err(e) => warn!("detail task for {url} did not complete: {e}"),
            }
        }

        Ok(merge_list_results(start_url, items, &detail_data))
    }

    async fn read_list_html(
        &self,
        page: &Page,
        config: &ScraperConfiguration,
        options: &InteractionOptions,
    ) -> Result<String> {
        if let Some(wait) = &config.page_load_wait_options {
            interaction::apply_page_wait(page, wait).await;
        }
        interaction::close_popups(page, &config.close_popup_selectors).await;
        tokio::time::sleep(self.settings.list_settle_delay()).await;

        if let Err(e) = interaction::run_interaction(page, options, &config.item_selector).await {
            warn!("interaction aborted, extracting what loaded: {e}");
        }
        interaction::remove_excluded(page, &config.exclude_selectors).await;
        Ok(page.content().await?)
    }

    async fn persist(
        &self,
        config: &ScraperConfiguration,
        results: Vec<ProcessingResult>,
    ) -> Result<UpsertOutcome> {
        if results.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let now = Utc::now();
        let records: Vec<ScrapedRecord> = results
            .into_iter()
            .map(|result| ScrapedRecord {
                config_id: config.id.clone(),
                url: result.url,
                data: result.data,
                scraped_at: now,
            })
            .collect();
        let outcome = self.results.bulk_upsert(records).await?;
        for write_error in &outcome.write_errors {
            warn!("result store write error: {write_error}");
        }
        Ok(outcome)
    }

    pub async fn pool_stats(&self) -> crate::browser::PoolStats {
        self.pool.stats().await
    }
}

/// Merge each list item with its detail data (empty object when the
/// detail task failed or was skipped). Items without a detail URL get a
/// start-URL-scoped synthetic key so upserts cannot collide.
fn merge_list_results(
    start_url: &str,
    items: Vec<ListItem>,
    detail_data: &HashMap<String, Value>,
) -> Vec<ProcessingResult> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let url = item
                .detail_url
                .clone()
                .unwrap_or_else(|| format!("{start_url}#item-{index}-listonly"));
            let detail = item
                .detail_url
                .as_deref()
                .and_then(|detail_url| detail_data.get(detail_url))
                .cloned()
                .unwrap_or_else(|| json!({}));
            ProcessingResult {
                url,
                data: json!({
                    "listData": item.list_data,
                    "detailData": detail,
                }),
            }
        })
        .collect()
}

fn parse_page_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ScrapeError::Config(format!("invalid page url '{url}': {e}")))
}
