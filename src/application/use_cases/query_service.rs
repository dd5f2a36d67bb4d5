//! Query Service
//!
//! Long-lived context for answering prompts. Holds the embedder, the execution
//! store and the current vector index, and runs one request end to end:
//!
//! prompt → embed → rank → decide → extract + bind → execute → rows
//!
//! or stops after `decide` with suggestions. The index can be rebuilt while
//! requests are in flight; a request keeps the snapshot it started with.

use crate::application::use_cases::match_decision::{self, MatchResult, MatchSettings};
use crate::application::use_cases::result_streamer::RowStream;
use crate::application::use_cases::template_binder;
use crate::application::use_cases::vector_index::VectorIndex;
use crate::domain::error::{AppError, Result};
use crate::domain::parameters::ParameterMap;
use crate::domain::template::{Suggestion, TemplateSummary};
use crate::infrastructure::db::{ExecutionStore, TemplateStore};
use crate::infrastructure::embedding::Embedder;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Describes the template a row stream came from.
#[derive(Debug, Clone, Serialize)]
pub struct MatchMeta {
    pub matched: bool,
    pub similarity: f32,
    pub template: String,
    pub params: ParameterMap,
    pub columns: Vec<String>,
}

pub enum QueryOutcome {
    Rows { meta: MatchMeta, rows: RowStream },
    Suggestions(Vec<Suggestion>),
}

pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    executor: Arc<dyn ExecutionStore>,
    index: RwLock<Arc<VectorIndex>>,
    settings: MatchSettings,
}

impl QueryService {
    /// Load the catalog and build the first index. Fails with `NoCatalog`
    /// when nothing is rankable.
    pub async fn load(
        embedder: Arc<dyn Embedder>,
        templates: &dyn TemplateStore,
        executor: Arc<dyn ExecutionStore>,
        settings: MatchSettings,
    ) -> Result<Self> {
        let index = VectorIndex::build(templates.load_templates().await?)?;
        Ok(Self::with_index(embedder, executor, index, settings))
    }

    pub fn with_index(
        embedder: Arc<dyn Embedder>,
        executor: Arc<dyn ExecutionStore>,
        index: VectorIndex,
        settings: MatchSettings,
    ) -> Self {
        Self {
            embedder,
            executor,
            index: RwLock::new(Arc::new(index)),
            settings,
        }
    }

    pub async fn answer(&self, prompt: &str) -> Result<QueryOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::ValidationError("missing query".to_string()));
        }

        let index = self.index.read().await.clone();

        let query_vector = self.embedder.embed(prompt).await?;
        if query_vector.len() != index.dimension() {
            return Err(AppError::EmbeddingFailure(format!(
                "query embedding has dimension {} but the catalog uses {}",
                query_vector.len(),
                index.dimension()
            )));
        }

        let ranked = index.rank(&query_vector);
        let result = match_decision::resolve(
            &index,
            &ranked,
            &self.settings,
            prompt,
            self.executor.bind_style(),
        )?;

        match result {
            MatchResult::Fallback { suggestions } => {
                info!(
                    "No template above threshold {:.2} (best {:.3}), returning {} suggestions",
                    self.settings.threshold,
                    ranked.first().map(|r| r.similarity).unwrap_or(f32::NAN),
                    suggestions.len()
                );
                Ok(QueryOutcome::Suggestions(suggestions))
            }
            MatchResult::Bound {
                template,
                similarity,
                bound,
            } => {
                let param_names: Vec<&str> = bound.params.names().collect();
                info!(
                    "Matched template '{}' (similarity {:.3}, params {:?})",
                    template.name, similarity, param_names
                );
                debug!("Bound SQL: {}", bound.sql);

                let rows = match self.executor.execute(&bound).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!(
                            template = %template.name,
                            sql = %bound.sql,
                            params = %serde_json::to_string(&bound.params).unwrap_or_default(),
                            "Execution failed: {}",
                            e
                        );
                        return Err(e);
                    }
                };

                let meta = MatchMeta {
                    matched: true,
                    similarity,
                    template: template.name,
                    params: bound.params,
                    columns: rows.columns().to_vec(),
                };
                Ok(QueryOutcome::Rows { meta, rows })
            }
        }
    }

    /// Rebuild the index from `templates` and swap it in. The previous index
    /// stays active when the rebuild fails.
    pub async fn reload(&self, templates: &dyn TemplateStore) -> Result<usize> {
        let index = VectorIndex::build(templates.load_templates().await?)?;
        let count = index.len();
        *self.index.write().await = Arc::new(index);
        info!("Reloaded template catalog ({} templates)", count);
        Ok(count)
    }

    pub async fn catalog_summary(&self) -> Vec<TemplateSummary> {
        let index = self.index.read().await.clone();
        index
            .templates()
            .iter()
            .enumerate()
            .map(|(i, t)| TemplateSummary {
                id: t.id,
                name: t.name.clone(),
                intent_text: t.intent_text.clone(),
                parameters: template_binder::placeholder_names(&t.sql_text),
                rankable: index.is_rankable(i),
            })
            .collect()
    }

    pub async fn template_count(&self) -> usize {
        self.index.read().await.len()
    }

    pub fn embedder_description(&self) -> String {
        self.embedder.describe()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::application::use_cases::result_streamer::CellValue;
    use crate::domain::parameters::ParamValue;
    use futures::StreamExt;

    async fn service(store: Arc<RecordingStore>) -> QueryService {
        QueryService::load(
            Arc::new(sales_embedder()),
            &MemoryTemplates(sales_catalog()),
            store,
            MatchSettings::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_answer_sales_by_region_end_to_end() {
        let store = Arc::new(RecordingStore::new(
            &["region", "total"],
            vec![vec![CellValue::Text("EAST".into()), CellValue::Int(15)]],
        ));
        let service = service(store.clone()).await;

        let outcome = service.answer("{region=EAST} show sales").await.unwrap();
        let QueryOutcome::Rows { meta, rows } = outcome else {
            panic!("expected rows");
        };
        assert_eq!(meta.template, "sales_by_region");
        assert_eq!(meta.columns, vec!["region".to_string(), "total".to_string()]);

        let bound = store.last.lock().unwrap().clone().unwrap();
        assert_eq!(
            bound.sql,
            "SELECT region, SUM(amt) FROM sales WHERE region=:region"
        );
        assert_eq!(
            bound.params.get("region"),
            Some(&ParamValue::Text("EAST".to_string()))
        );

        let rows: Vec<_> = rows.map(|r| r.unwrap()).collect().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            serde_json::to_value(&rows[0]).unwrap(),
            serde_json::json!({"region": "EAST", "total": 15})
        );
    }

    #[tokio::test]
    async fn test_answer_falls_back_below_threshold() {
        let store = Arc::new(RecordingStore::new(&[], vec![]));
        let service = service(store.clone()).await;

        let outcome = service.answer("what is the weather").await.unwrap();
        let QueryOutcome::Suggestions(suggestions) = outcome else {
            panic!("expected suggestions");
        };
        let intents: Vec<&str> = suggestions.iter().map(|s| s.suggestion.as_str()).collect();
        assert_eq!(
            intents,
            vec!["list all employees", "best selling products", "total sales for a region"]
        );
        assert_eq!(suggestions[1].parameters, vec!["n".to_string()]);
        assert!(store.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_answer_missing_parameter_never_executes() {
        let store = Arc::new(RecordingStore::new(&[], vec![]));
        let service = service(store.clone()).await;

        let err = service.answer("show sales").await.err().unwrap();
        assert!(matches!(err, AppError::MissingParameter(ref name) if name == "region"));
        assert!(store.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_answer_rejects_empty_prompt_and_bad_embeddings() {
        let service = service(Arc::new(RecordingStore::new(&[], vec![]))).await;

        assert!(matches!(
            service.answer("   ").await.err().unwrap(),
            AppError::ValidationError(_)
        ));
        assert!(matches!(
            service.answer("wrong size").await.err().unwrap(),
            AppError::EmbeddingFailure(_)
        ));
        assert!(matches!(
            service.answer("unknown prompt").await.err().unwrap(),
            AppError::EmbeddingFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_load_without_rankable_templates_is_no_catalog() {
        let mut catalog = sales_catalog();
        for t in catalog.iter_mut() {
            t.embedding = None;
        }
        let result = QueryService::load(
            Arc::new(sales_embedder()),
            &MemoryTemplates(catalog),
            Arc::new(RecordingStore::new(&[], vec![])),
            MatchSettings::default(),
        )
        .await;
        assert!(matches!(result.err().unwrap(), AppError::NoCatalog(_)));
    }

    #[tokio::test]
    async fn test_reload_swaps_index_and_keeps_old_on_failure() {
        let service = service(Arc::new(RecordingStore::new(&[], vec![]))).await;
        assert_eq!(service.template_count().await, 3);

        let mut smaller = sales_catalog();
        smaller.truncate(2);
        assert_eq!(service.reload(&MemoryTemplates(smaller)).await.unwrap(), 2);
        assert_eq!(service.template_count().await, 2);

        assert!(service.reload(&MemoryTemplates(vec![])).await.is_err());
        assert_eq!(service.template_count().await, 2);
    }

    #[tokio::test]
    async fn test_catalog_summary_lists_parameters() {
        let service = service(Arc::new(RecordingStore::new(&[], vec![]))).await;
        let summary = service.catalog_summary().await;
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[1].name, "sales_by_region");
        assert_eq!(summary[1].parameters, vec!["region".to_string()]);
        assert!(summary.iter().all(|s| s.rankable));
    }
}
