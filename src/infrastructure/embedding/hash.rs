//! Deterministic bag-of-words embedder.
//!
//! Each lower-cased alphanumeric token is hashed with SHA-256 into one signed
//! bucket; the result is L2-normalised. Texts sharing words land close
//! together, which is enough for offline demos and tests. It carries no
//! semantics beyond word overlap.

use super::{check_vector, Embedder};
use crate::domain::error::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(AppError::ValidationError(
                "hash embedder dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();

        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(head);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(AppError::EmbeddingFailure(format!(
                "text has no hashable tokens: {:?}",
                text
            )));
        }
        for x in vector.iter_mut() {
            *x /= norm;
        }
        check_vector(vector)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    fn describe(&self) -> String {
        format!("sha256-bag-of-words-{}", self.dimension)
    }
}
