//! Keyword filtering of extracted records.

use serde_json::Value;

/// True when the record should be kept.
///
/// An empty keyword list keeps everything; otherwise a record passes iff
/// any keyword occurs case-insensitively in any string leaf of its data,
/// short-circuiting on the first match.
pub fn passes_keyword_filter(data: &Value, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    contains_any(data, &needles)
}

fn contains_any(value: &Value, needles: &[String]) -> bool {
    match value {
        Value::String(s) => {
            let haystack = s.to_lowercase();
            needles.iter().any(|needle| haystack.contains(needle))
        }
        Value::Array(items) => items.iter().any(|item| contains_any(item, needles)),
        Value::Object(fields) => fields.values().any(|field| contains_any(field, needles)),
        _ => false,
    }
}
