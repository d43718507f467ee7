//! Selector-driven field extraction.
//!
//! Extraction runs over the HTML snapshot a page yields after interaction,
//! against a root element (a list item or a detail-page root). Mappings
//! that fail degrade to "no value"; they never abort the item.

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::models::{ExtractFrom, FieldMapping};

/// One list item's extracted data plus its outbound detail link, if any.
#[derive(Debug, Clone)]
pub struct ListItem {
    pub list_data: Value,
    pub detail_url: Option<String>,
}

/// Extract every element matching `item_selector` as a list item.
pub fn extract_list_items(
    html: &str,
    base: &Url,
    item_selector: &str,
    mappings: &[FieldMapping],
) -> Result<Vec<ListItem>> {
    let document = Html::parse_document(html);
    let selector = parse_selector(item_selector)?;
    Ok(document
        .select(&selector)
        .map(|element| ListItem {
            list_data: extract_fields(element, mappings, base),
            detail_url: find_detail_url(element, base),
        })
        .collect())
}

/// Extract a detail record rooted at the first match of `root_selector`.
///
/// Returns `Ok(None)` when the root is absent or nothing extracted —
/// an empty detail page is not an error.
pub fn extract_detail_record(
    html: &str,
    base: &Url,
    root_selector: &str,
    mappings: &[FieldMapping],
) -> Result<Option<Value>> {
    let document = Html::parse_document(html);
    let selector = parse_selector(root_selector)?;
    let Some(root) = document.select(&selector).next() else {
        return Ok(None);
    };
    let data = extract_fields(root, mappings, base);
    match data.as_object() {
        Some(fields) if !fields.is_empty() => Ok(Some(data)),
        _ => Ok(None),
    }
}

/// Apply every mapping against `root`, building a nested record by
/// dot-path insertion. Empty values are omitted, never written.
pub fn extract_fields(root: ElementRef<'_>, mappings: &[FieldMapping], base: &Url) -> Value {
    let mut out = Map::new();
    for mapping in mappings {
        match extract_one(root, mapping, base) {
            Ok(Some(value)) => insert_path(&mut out, &mapping.field_name, value),
            Ok(None) => {}
            Err(reason) => debug!("field '{}' skipped: {reason}", mapping.field_name),
        }
    }
    Value::Object(out)
}

fn extract_one(
    root: ElementRef<'_>,
    mapping: &FieldMapping,
    base: &Url,
) -> std::result::Result<Option<Value>, String> {
    let targets = resolve_targets(root, &mapping.selector)?;
    if targets.is_empty() {
        return Ok(None);
    }

    let value = match mapping.extract_from {
        ExtractFrom::Text => {
            let text = targets
                .iter()
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        ExtractFrom::Attribute => {
            let name = mapping
                .attribute_name
                .as_deref()
                .ok_or("attribute extraction without attributeName")?;
            targets[0].value().attr(name).and_then(|raw| {
                let raw = raw.trim();
                if raw.is_empty() {
                    None
                } else if name.eq_ignore_ascii_case("href") || name.eq_ignore_ascii_case("src") {
                    Some(resolve_url(base, raw))
                } else {
                    Some(raw.to_string())
                }
            })
        }
        ExtractFrom::Html => {
            let html = targets[0].inner_html();
            let html = html.trim();
            if html.is_empty() {
                None
            } else {
                Some(html.to_string())
            }
        }
    };
    Ok(value.map(Value::String))
}

/// `:scope` and `*` address the root element itself; anything else selects
/// matching descendants.
fn resolve_targets<'a>(
    root: ElementRef<'a>,
    selector: &str,
) -> std::result::Result<Vec<ElementRef<'a>>, String> {
    let selector = selector.trim();
    if selector == ":scope" || selector == "*" {
        return Ok(vec![root]);
    }
    let parsed =
        Selector::parse(selector).map_err(|e| format!("invalid selector '{selector}': {e}"))?;
    Ok(root.select(&parsed).collect())
}

/// Inner text with all whitespace runs collapsed to single spaces.
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Insert `value` at a dot-separated path, creating intermediate objects.
///
/// An existing non-object intermediate wins over the new write: a later
/// mapping sharing a prefix must not clobber an earlier field.
fn insert_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return;
    };

    let mut current = out;
    let mut key = first;
    for next in segments {
        let slot = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(nested) = slot.as_object_mut() else {
            debug!("dot-path '{path}' collides with a scalar at '{key}', skipping");
            return;
        };
        current = nested;
        key = next;
    }
    current.insert(key.to_string(), value);
}

/// First qualifying outbound link of a list item, in document order:
/// http(s), same host as the listing page, not `#`/`javascript:`/`mailto:`.
/// When the item element is itself an anchor it is considered first.
pub fn find_detail_url(item: ElementRef<'_>, base: &Url) -> Option<String> {
    let root_anchor =
        std::iter::once(item).filter(|el| el.value().name().eq_ignore_ascii_case("a"));
    for anchor in root_anchor.chain(item.select(anchor_selector())) {
        if let Some(href) = anchor.value().attr("href") {
            if let Some(url) = qualify_detail_href(href, base) {
                return Some(url);
            }
        }
    }
    None
}

fn qualify_detail_href(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    let resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    if resolved.host_str() != base.host_str() {
        return None;
    }
    Some(resolved.to_string())
}

/// Resolve a possibly-relative href against the page URL, falling back to
/// the raw value when it cannot be joined.
pub fn resolve_url(base: &Url, raw: &str) -> String {
    match base.join(raw) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => raw.to_string(),
    }
}

fn anchor_selector() -> &'static Selector {
    static ANCHOR: OnceLock<Selector> = OnceLock::new();
    ANCHOR.get_or_init(|| Selector::parse("a[href]").expect("static selector parses"))
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw)
        .map_err(|e| ScrapeError::Extraction(format!("invalid selector '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractFrom;

    fn mapping(field: &str, selector: &str, from: ExtractFrom) -> FieldMapping {
        FieldMapping {
            field_name: field.to_string(),
            selector: selector.to_string(),
            extract_from: from,
            attribute_name: None,
        }
    }

    fn attr_mapping(field: &str, selector: &str, attribute: &str) -> FieldMapping {
        FieldMapping {
            attribute_name: Some(attribute.to_string()),
            ..mapping(field, selector, ExtractFrom::Attribute)
        }
    }

    fn page_url() -> Url {
        Url::parse("https://a.com/y").expect("test url parses")
    }

    fn first_root<'a>(document: &'a Html, selector: &Selector) -> ElementRef<'a> {
        document.select(selector).next().expect("root present")
    }

    #[test]
    fn dot_path_builds_nested_objects() {
        let document = Html::parse_fragment("<div class=\"item\">X</div>");
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        let data = extract_fields(root, &[mapping("a.b.c", ":scope", ExtractFrom::Text)], &page_url());
        assert_eq!(data, serde_json::json!({"a": {"b": {"c": "X"}}}));
    }

    #[test]
    fn text_concatenates_and_collapses_whitespace() {
        let document = Html::parse_fragment(
            "<div class=\"item\"><p>  first\n chunk </p><p></p><p>second</p></div>",
        );
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        let data = extract_fields(root, &[mapping("body", "p", ExtractFrom::Text)], &page_url());
        assert_eq!(data, serde_json::json!({"body": "first chunk second"}));
    }

    #[test]
    fn href_attribute_resolves_to_absolute_url() {
        let document = Html::parse_fragment("<div class=\"item\"><a href=\"/x\">go</a></div>");
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        let data = extract_fields(root, &[attr_mapping("link", "a", "href")], &page_url());
        assert_eq!(data, serde_json::json!({"link": "https://a.com/x"}));
    }

    #[test]
    fn non_url_attribute_is_passed_through() {
        let document =
            Html::parse_fragment("<div class=\"item\"><span data-id=\"42\">n</span></div>");
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        let data = extract_fields(root, &[attr_mapping("id", "span", "data-id")], &page_url());
        assert_eq!(data, serde_json::json!({"id": "42"}));
    }

    #[test]
    fn html_mode_takes_inner_html_of_first_match() {
        let document = Html::parse_fragment(
            "<div class=\"item\"><div class=\"b\"><em>rich</em></div><div class=\"b\">two</div></div>",
        );
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        let data = extract_fields(root, &[mapping("raw", ".b", ExtractFrom::Html)], &page_url());
        assert_eq!(data, serde_json::json!({"raw": "<em>rich</em>"}));
    }

    #[test]
    fn empty_values_are_omitted_not_written() {
        let document = Html::parse_fragment("<div class=\"item\"><p>   </p></div>");
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        let data = extract_fields(
            root,
            &[
                mapping("present", ":scope", ExtractFrom::Text),
                mapping("missing", ".nope", ExtractFrom::Text),
                mapping("blank", "p", ExtractFrom::Text),
            ],
            &page_url(),
        );
        assert_eq!(data, serde_json::json!({}));
    }

    #[test]
    fn later_mapping_does_not_clobber_scalar_prefix() {
        let mut out = Map::new();
        insert_path(&mut out, "a.b", Value::String("kept".into()));
        insert_path(&mut out, "a.b.c", Value::String("dropped".into()));
        assert_eq!(Value::Object(out), serde_json::json!({"a": {"b": "kept"}}));
    }

    #[test]
    fn detail_url_takes_first_same_host_anchor() {
        let document = Html::parse_fragment(
            "<div class=\"item\">\
               <a href=\"#top\">anchor</a>\
               <a href=\"javascript:void(0)\">js</a>\
               <a href=\"mailto:x@a.com\">mail</a>\
               <a href=\"https://other.com/p/9\">offsite</a>\
               <a href=\"/p/1\">yes</a>\
               <a href=\"/p/2\">later</a>\
             </div>",
        );
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        assert_eq!(
            find_detail_url(root, &page_url()),
            Some("https://a.com/p/1".to_string())
        );
    }

    #[test]
    fn detail_url_sees_item_that_is_itself_an_anchor() {
        let document = Html::parse_fragment("<a class=\"item\" href=\"/p/7\">card</a>");
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        assert_eq!(
            find_detail_url(root, &page_url()),
            Some("https://a.com/p/7".to_string())
        );
    }

    #[test]
    fn detail_url_is_none_without_qualifying_anchor() {
        let document = Html::parse_fragment(
            "<div class=\"item\"><a href=\"https://other.com/x\">off</a></div>",
        );
        let selector = Selector::parse(".item").expect("selector");
        let root = first_root(&document, &selector);
        assert_eq!(find_detail_url(root, &page_url()), None);
    }

    #[test]
    fn list_extraction_yields_one_item_per_match() {
        let html = "<ul>\
            <li class=\"item\"><h2>One</h2><a href=\"/p/1\">more</a></li>\
            <li class=\"item\"><h2>Two</h2></li>\
        </ul>";
        let items = extract_list_items(
            html,
            &page_url(),
            ".item",
            &[mapping("title", "h2", ExtractFrom::Text)],
        )
        .expect("extraction runs");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].list_data, serde_json::json!({"title": "One"}));
        assert_eq!(items[0].detail_url.as_deref(), Some("https://a.com/p/1"));
        assert!(items[1].detail_url.is_none());
    }

    #[test]
    fn detail_extraction_without_root_is_none() {
        let record = extract_detail_record(
            "<div>nothing here</div>",
            &page_url(),
            ".detail",
            &[mapping("title", "h1", ExtractFrom::Text)],
        )
        .expect("extraction runs");
        assert!(record.is_none());
    }

    #[test]
    fn detail_extraction_with_empty_fields_is_none() {
        let record = extract_detail_record(
            "<div class=\"detail\"><p></p></div>",
            &page_url(),
            ".detail",
            &[mapping("title", "h1", ExtractFrom::Text)],
        )
        .expect("extraction runs");
        assert!(record.is_none());
    }

    #[test]
    fn invalid_item_selector_is_an_extraction_error() {
        let result = extract_list_items("<div></div>", &page_url(), "???", &[]);
        assert!(matches!(result, Err(ScrapeError::Extraction(_))));
    }
}
