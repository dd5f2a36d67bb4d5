use serde::{Deserialize, Serialize};

/// A parameterized SQL statement addressed by its natural-language intent.
///
/// `sql_text` may contain `{name}` placeholders. `embedding` is the vector of
/// `intent_text`; templates without one are kept in the catalog but never
/// ranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub intent_text: String,
    pub sql_text: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// One entry of a fallback suggestion list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion: String,
    pub parameters: Vec<String>,
}

/// Catalog listing used by the help endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub id: i64,
    pub name: String,
    pub intent_text: String,
    pub parameters: Vec<String>,
    pub rankable: bool,
}
