//! Embedding collaborators.
//!
//! Every provider maps text to a fixed-length `f32` vector. Templates and
//! queries must go through the same provider and model, otherwise their
//! vectors are not comparable.

pub mod hash;
pub mod local;
pub mod remote;

use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::{EmbeddingProvider, EmbeddingSettings};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use hash::HashEmbedder;
pub use local::LocalEmbedder;
pub use remote::{OllamaEmbedder, OpenAiEmbedder};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Short label for logs and health output.
    fn describe(&self) -> String;
}

/// Build the embedder named by `settings.provider`.
pub fn build_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match settings.provider {
        EmbeddingProvider::Local => Arc::new(LocalEmbedder::new(&settings.model)),
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(settings.dimension)?),
        EmbeddingProvider::Ollama => {
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Arc::new(OllamaEmbedder::new(base_url, settings.model.clone()))
        }
        EmbeddingProvider::OpenAi => {
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Arc::new(OpenAiEmbedder::new(
                base_url,
                settings.model.clone(),
                settings.resolved_api_key()?,
            ))
        }
    };
    info!("Using embedder: {}", embedder.describe());
    Ok(embedder)
}

/// Reject vectors no index can use.
pub(crate) fn check_vector(embedding: Vec<f32>) -> Result<Vec<f32>> {
    if embedding.is_empty() {
        return Err(AppError::EmbeddingFailure(
            "Empty embedding response".to_string(),
        ));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(AppError::EmbeddingFailure(
            "Embedding contains non-finite values".to_string(),
        ));
    }
    Ok(embedding)
}

pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::ValidationError(format!(
            "Invalid embedding bytes length: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_are_little_endian_f32() {
        let embedding = vec![1.0f32, -0.5, 0.25];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), embedding);
    }

    #[test]
    fn test_bytes_to_embedding_rejects_partial_floats() {
        assert!(bytes_to_embedding(&[0, 0, 128]).is_err());
        assert!(bytes_to_embedding(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_check_vector() {
        assert!(matches!(
            check_vector(vec![]),
            Err(AppError::EmbeddingFailure(_))
        ));
        assert!(check_vector(vec![f32::NAN]).is_err());
        assert_eq!(check_vector(vec![0.5]).unwrap(), vec![0.5]);
    }

    #[tokio::test]
    async fn test_build_hash_embedder_from_settings() {
        let settings = EmbeddingSettings {
            provider: EmbeddingProvider::Hash,
            dimension: 16,
            ..EmbeddingSettings::default()
        };
        let embedder = build_embedder(&settings).unwrap();
        assert_eq!(embedder.embed("total sales").await.unwrap().len(), 16);
    }
}
