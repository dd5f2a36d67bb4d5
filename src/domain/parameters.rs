use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Scalar value supplied for a template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Infer a value from raw text: all ASCII digits → integer, then a finite
    /// float, otherwise the text itself.
    pub fn infer(raw: &str) -> Self {
        let raw = raw.trim();
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(i) = raw.parse::<i64>() {
                return ParamValue::Int(i);
            }
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => ParamValue::Float(f),
            _ => ParamValue::Text(raw.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ParamValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Named parameter values in insertion order.
///
/// Names compare case-insensitively: inserting `ID` after `id` replaces the
/// earlier entry, so the last occurrence always wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    entries: Vec<(String, ParamValue)>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value));
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, ParamValue)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (K, ParamValue)>>(iter: I) -> Self {
        let mut map = ParameterMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for ParameterMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_priority() {
        assert_eq!(ParamValue::infer("5"), ParamValue::Int(5));
        assert_eq!(ParamValue::infer(" 42 "), ParamValue::Int(42));
        assert_eq!(ParamValue::infer("3.5"), ParamValue::Float(3.5));
        assert_eq!(ParamValue::infer("-5"), ParamValue::Float(-5.0));
        assert_eq!(ParamValue::infer("Acme"), ParamValue::Text("Acme".to_string()));
    }

    #[test]
    fn test_infer_rejects_non_finite_floats() {
        assert_eq!(ParamValue::infer("inf"), ParamValue::Text("inf".to_string()));
        assert_eq!(ParamValue::infer("NaN"), ParamValue::Text("NaN".to_string()));
    }

    #[test]
    fn test_infer_integer_overflow_falls_through_to_float() {
        let value = ParamValue::infer("99999999999999999999");
        assert!(matches!(value, ParamValue::Float(_)));
    }

    #[test]
    fn test_insert_replaces_case_insensitively() {
        let mut map = ParameterMap::new();
        map.insert("Region", ParamValue::Text("WEST".to_string()));
        map.insert("region", ParamValue::Text("EAST".to_string()));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("REGION"), Some(&ParamValue::Text("EAST".to_string())));
    }

    #[test]
    fn test_serializes_as_json_object() {
        let map: ParameterMap = vec![
            ("limit", ParamValue::Int(5)),
            ("rate", ParamValue::Float(3.5)),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({"limit": 5, "rate": 3.5}));
    }
}
