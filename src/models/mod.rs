//! Data model for crawl jobs and their results.
//!
//! Job configurations are JSON documents owned by the external
//! configuration store; field names are camelCase on the wire. The core
//! treats them as read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a start URL enumerates many items or represents a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageType {
    /// A page listing many items, each possibly linking to a detail page.
    ListPage,
    /// A page holding one item's full data.
    DetailPage,
}

/// Where a field's value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractFrom {
    /// Concatenated trimmed inner text of every matched element.
    Text,
    /// A named attribute of the first matched element.
    Attribute,
    /// Inner HTML of the first matched element.
    Html,
}

/// A rule mapping one output field to a selector and extraction mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// Dot-separated output path, e.g. `price.amount`.
    pub field_name: String,
    /// CSS selector; `:scope` or `*` targets the root element itself.
    pub selector: String,
    pub extract_from: ExtractFrom,
    /// Required when `extract_from` is `attribute`.
    #[serde(default)]
    pub attribute_name: Option<String>,
}

/// Technique used to reveal additional list items before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionStrategy {
    #[default]
    None,
    InfiniteScroll,
    LoadMoreButton,
    FixedScrolls,
}

/// Options controlling the scroll/click interaction loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractionOptions {
    pub strategy: InteractionStrategy,
    /// Safety cap on scroll cycles for the scroll-based strategies.
    pub max_scrolls: u32,
    pub scroll_delay_ms: u64,
    /// Window of consecutive non-growing height checks that ends a scroll
    /// loop early (converted to a count via `ceil(timeout / delay)`).
    pub scroll_stagnation_timeout_ms: u64,
    pub load_more_button_selector: Option<String>,
    pub max_clicks: u32,
    pub click_delay_ms: u64,
    /// Stop loading/extracting once this many list items are present.
    pub max_items_to_scrape: Option<usize>,
}

impl Default for InteractionOptions {
    fn default() -> Self {
        Self {
            strategy: InteractionStrategy::None,
            max_scrolls: 10,
            scroll_delay_ms: 1000,
            scroll_stagnation_timeout_ms: 3000,
            load_more_button_selector: None,
            max_clicks: 5,
            click_delay_ms: 1500,
            max_items_to_scrape: None,
        }
    }
}

/// Wait applied after navigation, before popups and extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitStrategy {
    #[default]
    None,
    Timeout,
    Selector,
}

/// Options for the pre-extraction wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageLoadWaitOptions {
    pub strategy: WaitStrategy,
    pub timeout_ms: u64,
    /// Selector to wait for when `strategy` is `selector`.
    pub selector: Option<String>,
}

impl Default for PageLoadWaitOptions {
    fn default() -> Self {
        Self {
            strategy: WaitStrategy::None,
            timeout_ms: 5000,
            selector: None,
        }
    }
}

/// A declarative crawl job description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperConfiguration {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub start_urls: Vec<String>,
    pub page_type: PageType,
    /// Selector for list items (list pages) or the extraction root
    /// (detail pages without `detail_item_selector`).
    pub item_selector: String,
    pub field_mappings: Vec<FieldMapping>,
    /// Follow each list item's detail link and scrape the linked page.
    #[serde(default)]
    pub scrape_details_from_list: bool,
    #[serde(default)]
    pub detail_item_selector: Option<String>,
    #[serde(default)]
    pub detail_field_mappings: Option<Vec<FieldMapping>>,
    #[serde(default)]
    pub interaction_options: Option<InteractionOptions>,
    #[serde(default)]
    pub page_load_wait_options: Option<PageLoadWaitOptions>,
    /// Selectors clicked (or removed) before extraction to dismiss popups.
    #[serde(default)]
    pub close_popup_selectors: Vec<String>,
    /// Subtrees removed from the DOM before extraction.
    #[serde(default)]
    pub exclude_selectors: Vec<String>,
    /// Case-insensitive substring filter; empty means "keep everything".
    #[serde(default)]
    pub keywords_to_filter_by: Vec<String>,
    /// Read by the external scheduler, never by the core.
    #[serde(default)]
    pub cron_enabled: bool,
    #[serde(default)]
    pub cron_expression: Option<String>,
}

impl ScraperConfiguration {
    /// Validate the invariants the engine depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("configuration id must not be empty".into());
        }
        if self.start_urls.is_empty() {
            return Err("startUrls must not be empty".into());
        }
        if self.item_selector.trim().is_empty() {
            return Err("itemSelector must not be empty".into());
        }
        if self.field_mappings.is_empty() {
            return Err("fieldMappings must not be empty".into());
        }
        for mapping in self
            .field_mappings
            .iter()
            .chain(self.detail_field_mappings.iter().flatten())
        {
            if mapping.extract_from == ExtractFrom::Attribute
                && mapping.attribute_name.as_deref().unwrap_or("").is_empty()
            {
                return Err(format!(
                    "field '{}' extracts an attribute but has no attributeName",
                    mapping.field_name
                ));
            }
        }
        Ok(())
    }
}

/// One extracted record, keyed by the URL it was derived from.
///
/// Created per item during a job run and consumed by the keyword filter and
/// the result store; never retained past the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub url: String,
    pub data: Value,
}

/// The persistence unit handed to the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub config_id: String,
    pub url: String,
    pub data: Value,
    pub scraped_at: DateTime<Utc>,
}

/// Per-configuration outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub config_id: String,
    pub success: bool,
    pub results_count: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> ScraperConfiguration {
        serde_json::from_value(serde_json::json!({
            "id": "cfg-1",
            "startUrls": ["https://example.com/list"],
            "pageType": "ListPage",
            "itemSelector": ".item",
            "fieldMappings": [
                {"fieldName": "title", "selector": "h2", "extractFrom": "text"}
            ]
        }))
        .expect("minimal config deserializes")
    }

    #[test]
    fn camel_case_round_trip() {
        let config = minimal_config();
        assert_eq!(config.id, "cfg-1");
        assert_eq!(config.page_type, PageType::ListPage);
        assert!(!config.scrape_details_from_list);
        assert!(config.interaction_options.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn interaction_defaults_fill_missing_fields() {
        let options: InteractionOptions =
            serde_json::from_value(serde_json::json!({"strategy": "infiniteScroll"}))
                .expect("partial options deserialize");
        assert_eq!(options.strategy, InteractionStrategy::InfiniteScroll);
        assert_eq!(options.max_scrolls, 10);
        assert_eq!(options.scroll_delay_ms, 1000);
        assert!(options.max_items_to_scrape.is_none());
    }

    #[test]
    fn attribute_mapping_requires_name() {
        let mut config = minimal_config();
        config.field_mappings.push(FieldMapping {
            field_name: "link".into(),
            selector: "a".into(),
            extract_from: ExtractFrom::Attribute,
            attribute_name: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_start_urls_rejected() {
        let mut config = minimal_config();
        config.start_urls.clear();
        assert!(config.validate().is_err());
    }
}
