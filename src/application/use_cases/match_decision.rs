//! Match Decision
//!
//! Turns a ranking into either a single selected template or a short list of
//! suggestions the caller can show to the user:
//! - top similarity >= threshold: the top-ranked template, nothing else
//! - otherwise: the top N intents with the parameter names they expect
//!
//! Near-ties are settled by the ranking order alone; there is no secondary
//! disambiguation step.

use crate::application::use_cases::parameter_extractor;
use crate::application::use_cases::template_binder::{self, BindStyle, BoundStatement};
use crate::application::use_cases::vector_index::{RankedTemplate, VectorIndex};
use crate::domain::error::{AppError, Result};
use crate::domain::template::{Suggestion, Template};

pub const DEFAULT_THRESHOLD: f32 = 0.52;
pub const DEFAULT_SUGGESTION_COUNT: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub threshold: f32,
    pub suggestion_count: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            suggestion_count: DEFAULT_SUGGESTION_COUNT,
        }
    }
}

/// Outcome of thresholding a ranking.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Selected(RankedTemplate),
    Fallback(Vec<Suggestion>),
}

/// A selected-and-bound template, or suggestions.
#[derive(Debug, Clone)]
pub enum MatchResult {
    Bound {
        template: Template,
        similarity: f32,
        bound: BoundStatement,
    },
    Fallback {
        suggestions: Vec<Suggestion>,
    },
}

/// Apply the threshold to `ranked`. An empty ranking falls back with no
/// suggestions.
pub fn decide(index: &VectorIndex, ranked: &[RankedTemplate], settings: &MatchSettings) -> Decision {
    match ranked.first() {
        Some(top) if top.similarity >= settings.threshold => Decision::Selected(*top),
        _ => Decision::Fallback(suggestions(index, ranked, settings.suggestion_count)),
    }
}

/// Decide, then extract the query's parameters and bind the selected template.
pub fn resolve(
    index: &VectorIndex,
    ranked: &[RankedTemplate],
    settings: &MatchSettings,
    query: &str,
    style: BindStyle,
) -> Result<MatchResult> {
    match decide(index, ranked, settings) {
        Decision::Fallback(suggestions) => Ok(MatchResult::Fallback { suggestions }),
        Decision::Selected(top) => {
            let template = index.template(top.index).ok_or_else(|| {
                AppError::Internal(format!("ranked template index {} out of range", top.index))
            })?;
            let params = parameter_extractor::extract(query);
            let bound = template_binder::bind(&template.sql_text, &params, style)?;
            Ok(MatchResult::Bound {
                template: template.clone(),
                similarity: top.similarity,
                bound,
            })
        }
    }
}

fn suggestions(index: &VectorIndex, ranked: &[RankedTemplate], count: usize) -> Vec<Suggestion> {
    ranked
        .iter()
        .take(count)
        .filter_map(|r| index.template(r.index))
        .map(|t| Suggestion {
            suggestion: t.intent_text.clone(),
            parameters: template_binder::placeholder_names(&t.sql_text),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parameters::ParamValue;

    fn template(id: i64, intent: &str, sql: &str, embedding: Vec<f32>) -> Template {
        Template {
            id,
            name: format!("template_{}", id),
            intent_text: intent.to_string(),
            sql_text: sql.to_string(),
            embedding: Some(embedding),
        }
    }

    fn three_template_index() -> VectorIndex {
        VectorIndex::build(vec![
            template(1, "list employees", "SELECT * FROM employees", vec![1.0, 0.0, 0.0]),
            template(
                2,
                "sales for a region",
                "SELECT * FROM sales WHERE region={region}",
                vec![0.0, 1.0, 0.0],
            ),
            template(
                3,
                "top sales by amount",
                "SELECT * FROM sales ORDER BY amount FETCH FIRST {limit} ROWS ONLY",
                vec![0.0, 0.0, 1.0],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_selects_closest_template_above_threshold() {
        let index = three_template_index();
        let ranked = index.rank(&[0.1, 0.95, 0.1]);

        match decide(&index, &ranked, &MatchSettings::default()) {
            Decision::Selected(top) => {
                assert_eq!(index.template(top.index).unwrap().id, 2);
                assert!(top.similarity >= DEFAULT_THRESHOLD);
            }
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let index = three_template_index();
        let ranked = vec![RankedTemplate {
            index: 0,
            similarity: 0.52,
        }];
        assert!(matches!(
            decide(&index, &ranked, &MatchSettings::default()),
            Decision::Selected(_)
        ));
    }

    #[test]
    fn test_below_threshold_falls_back_with_top_three_in_order() {
        let index = VectorIndex::build(vec![
            template(1, "first", "SELECT 1", vec![1.0, 0.0, 0.0, 0.0, 0.0]),
            template(2, "second", "SELECT {a}", vec![0.0, 1.0, 0.0, 0.0, 0.0]),
            template(3, "third", "SELECT {b}, {c}", vec![0.0, 0.0, 1.0, 0.0, 0.0]),
            template(4, "fourth", "SELECT 4", vec![0.0, 0.0, 0.0, 1.0, 0.0]),
        ])
        .unwrap();
        // the last axis belongs to no template, keeping every similarity low
        let ranked = index.rank(&[0.3, 0.4, 0.2, 0.1, 0.6]);
        assert!(ranked[0].similarity < DEFAULT_THRESHOLD);

        match decide(&index, &ranked, &MatchSettings::default()) {
            Decision::Fallback(suggestions) => {
                let intents: Vec<&str> =
                    suggestions.iter().map(|s| s.suggestion.as_str()).collect();
                assert_eq!(intents, vec!["second", "first", "third"]);
                assert_eq!(suggestions[0].parameters, vec!["a".to_string()]);
                assert!(suggestions[1].parameters.is_empty());
                assert_eq!(suggestions[2].parameters, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_ranking_falls_back_without_suggestions() {
        let index = three_template_index();
        assert_eq!(
            decide(&index, &[], &MatchSettings::default()),
            Decision::Fallback(Vec::new())
        );
    }

    #[test]
    fn test_resolve_sales_by_region() {
        let index = VectorIndex::build(vec![Template {
            id: 1,
            name: "sales_by_region".to_string(),
            intent_text: "total sales for a region".to_string(),
            sql_text: "SELECT region, SUM(amt) FROM sales WHERE region={region}".to_string(),
            embedding: Some(vec![1.0, 0.0]),
        }])
        .unwrap();
        let ranked = index.rank(&[0.9, 0.1]);

        let result = resolve(
            &index,
            &ranked,
            &MatchSettings::default(),
            "{region=EAST} show sales",
            BindStyle::Named,
        )
        .unwrap();

        match result {
            MatchResult::Bound { template, bound, .. } => {
                assert_eq!(template.name, "sales_by_region");
                assert_eq!(
                    bound.sql,
                    "SELECT region, SUM(amt) FROM sales WHERE region=:region"
                );
                assert_eq!(bound.params.len(), 1);
                assert_eq!(
                    bound.params.get("region"),
                    Some(&ParamValue::Text("EAST".to_string()))
                );
            }
            MatchResult::Fallback { .. } => panic!("expected a bound match"),
        }
    }

    #[test]
    fn test_resolve_propagates_missing_parameter() {
        let index = three_template_index();
        let ranked = index.rank(&[0.0, 1.0, 0.0]);
        let err = resolve(
            &index,
            &ranked,
            &MatchSettings::default(),
            "sales please",
            BindStyle::Named,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::MissingParameter(name) if name == "region"));
    }
}
