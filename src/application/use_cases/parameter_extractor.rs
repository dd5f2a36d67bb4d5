//! Extracts `{name=value}` assignments from free-text queries.

use crate::domain::parameters::{ParamValue, ParameterMap};
use once_cell::sync::Lazy;
use regex::Regex;

// name: no braces or '='; value: anything up to the closing brace
static ASSIGNMENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}=]*)=([^}]*)\}").expect("valid assignment pattern"));

/// Scan `query` left to right and collect every `{name=value}` assignment.
///
/// Names and values are trimmed; empty names are skipped. Values are coerced
/// with [`ParamValue::infer`]. A later assignment to the same name (compared
/// case-insensitively) replaces an earlier one.
pub fn extract(query: &str) -> ParameterMap {
    let mut params = ParameterMap::new();

    for caps in ASSIGNMENT_PATTERN.captures_iter(query) {
        let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let raw_value = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        params.insert(name, ParamValue::infer(raw_value));
    }

    params
}
