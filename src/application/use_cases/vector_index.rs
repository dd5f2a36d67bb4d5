//! In-memory vector index over the template catalog
//!
//! Ranks every rankable template against a query embedding by cosine
//! similarity with a full scan. At catalog sizes of tens to a few hundred
//! templates the O(N·D) scan is the whole algorithm; an approximate index can
//! replace it behind `rank` without touching callers.
//!
//! Templates whose embedding is absent, zero-norm or non-finite are kept in
//! the catalog (they still show up in listings) but are never ranked.

use crate::domain::error::{AppError, Result};
use crate::domain::template::Template;
use std::cmp::Ordering;
use tracing::{info, warn};

/// A ranked template position and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedTemplate {
    pub index: usize,
    pub similarity: f32,
}

/// Pre-normalised embedding of one rankable template.
#[derive(Debug, Clone)]
struct IndexedVector {
    template_index: usize,
    unit: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    templates: Vec<Template>,
    vectors: Vec<IndexedVector>,
    dimension: usize,
}

impl VectorIndex {
    /// Build the index, failing with `NoCatalog` when nothing can be ranked or
    /// when rankable embeddings disagree in length.
    pub fn build(templates: Vec<Template>) -> Result<Self> {
        if templates.is_empty() {
            return Err(AppError::NoCatalog("template catalog is empty".to_string()));
        }

        let mut vectors = Vec::with_capacity(templates.len());
        let mut dimension: Option<usize> = None;

        for (template_index, template) in templates.iter().enumerate() {
            let Some(embedding) = template.embedding.as_deref() else {
                warn!(template = %template.name, "Template has no embedding, excluded from ranking");
                continue;
            };

            let Some(unit) = unit_vector(embedding) else {
                warn!(template = %template.name, "Template embedding is zero or non-finite, excluded from ranking");
                continue;
            };

            match dimension {
                None => dimension = Some(unit.len()),
                Some(expected) if expected != unit.len() => {
                    return Err(AppError::NoCatalog(format!(
                        "template '{}' has embedding dimension {} but the catalog uses {}",
                        template.name,
                        unit.len(),
                        expected
                    )));
                }
                Some(_) => {}
            }

            vectors.push(IndexedVector {
                template_index,
                unit,
            });
        }

        let dimension = dimension.ok_or_else(|| {
            AppError::NoCatalog("no template carries a usable embedding".to_string())
        })?;

        info!(
            "Built vector index: {} of {} templates rankable (dimension {})",
            vectors.len(),
            templates.len(),
            dimension
        );

        Ok(Self {
            templates,
            vectors,
            dimension,
        })
    }

    /// Rank rankable templates against `query`, highest similarity first.
    ///
    /// Equal similarities keep catalog order. A query of the wrong length, with
    /// zero norm or non-finite components ranks nothing.
    pub fn rank(&self, query: &[f32]) -> Vec<RankedTemplate> {
        if query.len() != self.dimension {
            return Vec::new();
        }
        let Some(query_unit) = unit_vector(query) else {
            return Vec::new();
        };

        let mut ranked: Vec<RankedTemplate> = self
            .vectors
            .iter()
            .map(|v| RankedTemplate {
                index: v.template_index,
                similarity: dot(&query_unit, &v.unit),
            })
            .collect();

        // sort_by is stable, so ties stay in catalog order
        ranked.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        ranked
    }

    pub fn template(&self, index: usize) -> Option<&Template> {
        self.templates.get(index)
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_rankable(&self, index: usize) -> bool {
        self.vectors.iter().any(|v| v.template_index == index)
    }
}

/// Cosine similarity of two equal-length, non-zero vectors.
///
/// Returns `None` when lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        None
    } else {
        Some(dot_product / (norm_a * norm_b))
    }
}

fn unit_vector(v: &[f32]) -> Option<Vec<f32>> {
    if v.is_empty() || v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
