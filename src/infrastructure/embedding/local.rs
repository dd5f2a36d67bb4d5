use super::{check_vector, Embedder};
use crate::domain::error::{AppError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};
use tracing::info;

/// On-device sentence embeddings via fastembed (MiniLM family).
///
/// The model is loaded on first use and kept for the life of the process.
/// Inference is CPU-bound and runs on the blocking pool.
pub struct LocalEmbedder {
    model_name: String,
    embedder: Arc<Mutex<Option<TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            embedder: Arc::new(Mutex::new(None)),
        }
    }

    fn resolve_model(model: &str) -> EmbeddingModel {
        match model.trim().to_lowercase().as_str() {
            "all-minilm-l12-v2" => EmbeddingModel::AllMiniLML12V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            _ => EmbeddingModel::AllMiniLML6V2,
        }
    }

    fn embed_blocking(
        slot: &Mutex<Option<TextEmbedding>>,
        model_name: &str,
        text: String,
    ) -> Result<Vec<f32>> {
        let mut guard = slot
            .lock()
            .map_err(|_| AppError::Internal("Local embedder lock poisoned".to_string()))?;
        if guard.is_none() {
            info!("Loading local embedding model '{}'", model_name);
            let mut options = InitOptions::default();
            options.model_name = Self::resolve_model(model_name);
            let embedder = TextEmbedding::try_new(options).map_err(|e| {
                AppError::EmbeddingFailure(format!("Failed to init local embedder: {}", e))
            })?;
            *guard = Some(embedder);
        }
        let embedder = guard
            .as_mut()
            .ok_or_else(|| AppError::EmbeddingFailure("Local embedder unavailable".to_string()))?;
        let embeddings = embedder
            .embed(vec![text], None)
            .map_err(|e| AppError::EmbeddingFailure(format!("Failed to embed text: {}", e)))?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingFailure("Empty embedding response".to_string()))?;
        check_vector(embedding)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let slot = self.embedder.clone();
        let model_name = self.model_name.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || Self::embed_blocking(&slot, &model_name, text))
            .await
            .map_err(|e| AppError::Internal(format!("Embedding task failed: {}", e)))?
    }

    fn describe(&self) -> String {
        format!("fastembed:{}", self.model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_defaults_to_minilm_l6() {
        assert!(matches!(
            LocalEmbedder::resolve_model("All-MiniLM-L6-v2"),
            EmbeddingModel::AllMiniLML6V2
        ));
        assert!(matches!(
            LocalEmbedder::resolve_model("unknown"),
            EmbeddingModel::AllMiniLML6V2
        ));
        assert!(matches!(
            LocalEmbedder::resolve_model("bge-small-en-v1.5"),
            EmbeddingModel::BGESmallENV15
        ));
    }
}
