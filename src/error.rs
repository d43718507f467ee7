//! Error types for the crawl engine.

use thiserror::Error;

/// Errors surfaced by the browser pool and the scrape pipeline.
///
/// Most variants are absorbed close to where they occur (per field, per
/// detail page, per start URL); only configuration and pool lifecycle
/// errors reach the job boundary.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// No idle browser appeared within the bounded acquisition wait.
    #[error("browser pool exhausted after {attempts} poll attempts")]
    PoolExhausted { attempts: u32 },

    /// The pool rejects new acquisitions while shutting down.
    #[error("browser pool is shutting down")]
    PoolShuttingDown,

    /// A browser process failed to launch.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// Navigation failed or timed out.
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// A CDP call (page creation, script evaluation, ...) failed.
    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// An in-page script returned something undeserializable.
    #[error("evaluation result decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Extraction could not run against the page at all.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A job configuration violates an invariant.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A result store write failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ScrapeError>;
