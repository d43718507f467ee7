//! dragnet - configuration-driven headless-browser crawler.
//!
//! A declarative job description (start URLs, CSS selectors, field
//! mappings, interaction strategy) drives a bounded pool of headless
//! browsers: pages are loaded, dynamic content is revealed by scroll/click
//! loops, structured records are extracted via selector-to-field mappings,
//! linked detail pages are discovered and scraped, and results are
//! persisted idempotently keyed by `(config_id, url)`.

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod scrape;
pub mod store;

pub use browser::{BrowserPool, PageLease, PoolStats};
pub use config::{EngineSettings, PoolOptions};
pub use error::ScrapeError;
pub use scrape::{ScrapeService, MAX_DETAIL_PAGES_PER_JOB};
