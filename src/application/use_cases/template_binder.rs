//! Template Binder
//!
//! Rewrites `{placeholder}` markers in a SQL template into bind variables of
//! the target engine and collects the values those variables need.
//!
//! Security properties:
//! - User values never enter the SQL text; they travel only as bind arguments
//! - Placeholders follow a strict identifier grammar, so `{name=value}` query
//!   syntax (or any other brace text) is never mistaken for a placeholder
//! - Binding is all-or-nothing: the first unresolved placeholder aborts it

use crate::domain::error::{AppError, Result};
use crate::domain::parameters::{ParamValue, ParameterMap};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

static PLACEHOLDER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder pattern")
});

// name-like brace text; assignments and quoted or keyed content excluded
static LOOSE_BRACE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\s*[A-Za-z_][^{}=:'"]*\}"#).expect("valid brace pattern")
});

/// Bind-variable syntax of the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindStyle {
    /// `:name` (Oracle-style named binds)
    Named,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
    /// `?1`, `?2`, ... (SQLite)
    QuestionNumbered,
}

impl BindStyle {
    fn marker(&self, name: &str, slot: usize) -> String {
        match self {
            BindStyle::Named => format!(":{}", name),
            BindStyle::Dollar => format!("${}", slot),
            BindStyle::QuestionNumbered => format!("?{}", slot),
        }
    }
}

/// A template rewritten for execution.
///
/// `params` holds only the parameters the template references, keyed by
/// lower-cased name in the order their slots were assigned.
#[derive(Debug, Clone, Serialize)]
pub struct BoundStatement {
    pub sql: String,
    pub params: ParameterMap,
    pub style: BindStyle,
}

impl BoundStatement {
    /// Values in bind-slot order (slot 1 first).
    pub fn positional_values(&self) -> Vec<&ParamValue> {
        self.params.iter().map(|(_, v)| v).collect()
    }
}

/// Distinct placeholder names of `sql_text` in order of first appearance.
///
/// Names are compared case-insensitively; the first spelling is kept.
pub fn placeholder_names(sql_text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_PATTERN.captures_iter(sql_text) {
        let name = &caps[1];
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }
    names
}

/// Brace text that reads like a placeholder but is not one, such as
/// `{region-id}` or `{Region Name}`. Such text is left in the SQL as is.
pub fn malformed_placeholders(sql_text: &str) -> Vec<&str> {
    let mut found: Vec<&str> = Vec::new();
    for m in LOOSE_BRACE_PATTERN.find_iter(sql_text) {
        let text = m.as_str();
        if !PLACEHOLDER_PATTERN.is_match(text) && !found.contains(&text) {
            found.push(text);
        }
    }
    found
}

/// Bind `params` into `sql_text` using `style`.
///
/// Every occurrence of a placeholder is rewritten; repeated placeholders share
/// one bind slot. Parameters the template does not reference are dropped.
pub fn bind(sql_text: &str, params: &ParameterMap, style: BindStyle) -> Result<BoundStatement> {
    let mut sql = String::with_capacity(sql_text.len());
    let mut reduced = ParameterMap::new();
    let mut slots: Vec<String> = Vec::new();
    let mut last_end = 0;

    for text in malformed_placeholders(sql_text) {
        warn!("Template brace text {} is not a valid placeholder and stays literal", text);
    }

    for caps in PLACEHOLDER_PATTERN.captures_iter(sql_text) {
        let whole = caps.get(0).ok_or_else(|| {
            AppError::Internal("placeholder match without span".to_string())
        })?;
        let name = &caps[1];
        let key = name.to_lowercase();

        let value = params
            .get(&key)
            .ok_or_else(|| AppError::MissingParameter(name.to_string()))?;

        let slot = match slots.iter().position(|s| s == &key) {
            Some(pos) => pos + 1,
            None => {
                slots.push(key.clone());
                reduced.insert(key.clone(), value.clone());
                slots.len()
            }
        };

        sql.push_str(&sql_text[last_end..whole.start()]);
        sql.push_str(&style.marker(&key, slot));
        last_end = whole.end();
    }
    sql.push_str(&sql_text[last_end..]);

    debug!("Bound template with {} parameter(s)", reduced.len());

    Ok(BoundStatement {
        sql,
        params: reduced,
        style,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> ParameterMap {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn test_bind_single_placeholder() {
        let bound = bind(
            "SELECT * FROM t WHERE id={id}",
            &params(&[("id", ParamValue::Int(7))]),
            BindStyle::Named,
        )
        .unwrap();

        assert_eq!(bound.sql, "SELECT * FROM t WHERE id=:id");
        assert!(!bound.sql.contains('{'));
        assert_eq!(bound.params.len(), 1);
        assert_eq!(bound.params.get("id"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn test_bind_missing_parameter() {
        let err = bind(
            "SELECT * FROM t WHERE x={missing}",
            &ParameterMap::new(),
            BindStyle::Named,
        )
        .unwrap_err();
        match err {
            AppError::MissingParameter(name) => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bind_reports_first_missing_in_scan_order() {
        let err = bind(
            "SELECT * FROM t WHERE a={alpha} AND b={beta} AND c={gamma}",
            &params(&[("beta", ParamValue::Int(1))]),
            BindStyle::Named,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::MissingParameter(name) if name == "alpha"));
    }

    #[test]
    fn test_bind_is_case_insensitive_and_lowercases_keys() {
        let bound = bind(
            "SELECT region, SUM(amt) FROM sales WHERE region={Region}",
            &params(&[("REGION", ParamValue::Text("EAST".to_string()))]),
            BindStyle::Named,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT region, SUM(amt) FROM sales WHERE region=:region");
        let keys: Vec<&str> = bound.params.names().collect();
        assert_eq!(keys, vec!["region"]);
    }

    #[test]
    fn test_bind_drops_unreferenced_parameters() {
        let bound = bind(
            "SELECT * FROM t WHERE id={id}",
            &params(&[("id", ParamValue::Int(1)), ("extra", ParamValue::Int(2))]),
            BindStyle::Named,
        )
        .unwrap();
        assert_eq!(bound.params.len(), 1);
        assert!(!bound.params.contains("extra"));
    }

    #[test]
    fn test_bind_repeated_placeholder_shares_slot() {
        let bound = bind(
            "SELECT * FROM t WHERE a={x} OR b={y} OR c={X}",
            &params(&[("x", ParamValue::Int(1)), ("y", ParamValue::Int(2))]),
            BindStyle::Dollar,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a=$1 OR b=$2 OR c=$1");
        assert_eq!(
            bound.positional_values(),
            vec![&ParamValue::Int(1), &ParamValue::Int(2)]
        );

        let sqlite = bind(
            "SELECT * FROM t WHERE a={x} OR c={x}",
            &params(&[("x", ParamValue::Int(1))]),
            BindStyle::QuestionNumbered,
        )
        .unwrap();
        assert_eq!(sqlite.sql, "SELECT * FROM t WHERE a=?1 OR c=?1");
    }

    #[test]
    fn test_bind_leaves_non_placeholder_braces_alone() {
        let bound = bind(
            "SELECT '{a=b}' AS literal, '{ spaced }' AS other FROM t WHERE id={id}",
            &params(&[("id", ParamValue::Int(3))]),
            BindStyle::Named,
        )
        .unwrap();
        assert_eq!(
            bound.sql,
            "SELECT '{a=b}' AS literal, '{ spaced }' AS other FROM t WHERE id=:id"
        );
    }

    #[test]
    fn test_bind_without_placeholders() {
        let bound = bind("SELECT COUNT(*) FROM employees", &ParameterMap::new(), BindStyle::Named)
            .unwrap();
        assert_eq!(bound.sql, "SELECT COUNT(*) FROM employees");
        assert!(bound.params.is_empty());
    }

    #[test]
    fn test_placeholder_names_distinct_in_order() {
        let names = placeholder_names("SELECT * FROM t WHERE a={b} AND c={a} AND d={B} AND e={x=1}");
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_malformed_placeholders_stay_literal() {
        let sql = "SELECT * FROM t WHERE a = {region-id} AND b = {Region Name} AND c = {ok} AND d = '{x=1}'";
        assert_eq!(
            malformed_placeholders(sql),
            vec!["{region-id}", "{Region Name}"]
        );

        let bound = bind(sql, &params(&[("ok", ParamValue::Int(1))]), BindStyle::Named).unwrap();
        assert_eq!(
            bound.sql,
            "SELECT * FROM t WHERE a = {region-id} AND b = {Region Name} AND c = :ok AND d = '{x=1}'"
        );
        assert!(malformed_placeholders("SELECT {a}, {b_2} FROM t").is_empty());
    }
}
