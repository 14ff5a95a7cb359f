//! Embedding generation.
//!
//! [`TextEmbedder`] is the seam between the pipeline and the embedding
//! model: the production implementation wraps fastembed's ONNX runtime,
//! and [`HashingEmbedder`] provides a deterministic, dependency-free
//! alternative for tests and smoke environments.

use crate::error::{Result, VectorError};
use crate::store::{Definition, FileObject, MetricEvent, Store};
use crate::vector::{ObjectPointer, VectorIndex};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Produces fixed-dimension embeddings for text. Implementations are
/// blocking; async callers go through [`embed_one`].
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text off the async runtime's worker threads.
pub async fn embed_one(embedder: &Arc<dyn TextEmbedder>, text: &str) -> Result<Vec<f32>> {
    let embedder = embedder.clone();
    let text = text.to_string();

    let embeddings = tokio::task::spawn_blocking(move || embedder.embed(vec![text]))
        .await
        .map_err(|e| anyhow::anyhow!("embedding task failed: {e}"))??;

    embeddings
        .into_iter()
        .next()
        .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".to_string()).into())
}

/// fastembed-backed embedding model.
pub struct FastembedModel {
    model: fastembed::TextEmbedding,
    dimension: usize,
}

impl FastembedModel {
    /// Dimension of fastembed's default model (BGESmallENV15).
    pub const DEFAULT_DIMENSION: usize = 384;

    /// Create the default model, caching downloaded files in `cache_dir`.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        let options = fastembed::InitOptions::default()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(true);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;

        Ok(Self {
            model,
            dimension: Self::DEFAULT_DIMENSION,
        })
    }
}

impl TextEmbedder for FastembedModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts, None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()).into())
    }
}

/// Deterministic bag-of-words embedder: each word hashes into a bucket and
/// the vector is L2-normalized. No model download, stable across runs.
/// Useful wherever real semantic quality is not the point.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl TextEmbedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        Ok(texts
            .into_iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for word in text.to_lowercase().split_whitespace() {
                    let mut hasher = DefaultHasher::new();
                    word.hash(&mut hasher);
                    let bucket = (hasher.finish() % self.dimension as u64) as usize;
                    vector[bucket] += 1.0;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for value in &mut vector {
                        *value /= norm;
                    }
                }
                vector
            })
            .collect())
    }
}

/// Compose the similarity-searchable document for an object: its name and
/// path, followed by every definition's content in creation order.
pub fn compose_document(object: &FileObject, definitions: &[Definition]) -> String {
    let mut lines = Vec::with_capacity(definitions.len() + 2);
    lines.push(format!("File name: {}", object.name));
    lines.push(format!("File path: {}", object.path));
    for definition in definitions {
        lines.push(definition.content.clone());
    }
    lines.join("\n")
}

/// Background worker that upserts analyzed objects into the vector index.
pub struct EmbeddingGenerator {
    store: Store,
    index: Arc<VectorIndex>,
}

impl EmbeddingGenerator {
    pub fn new(store: Store, index: Arc<VectorIndex>) -> Self {
        Self { store, index }
    }

    /// Pick one eligible object at random and embed it. Returns whether an
    /// object was found. A time metric is recorded for the attempt whether
    /// or not the upsert succeeded.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(object) = self.store.random_embeddable_object().await? else {
            return Ok(false);
        };

        let definitions = self.store.definitions_for_object(object.id).await?;
        tracing::info!(
            id = %object.id,
            definitions = definitions.len(),
            "generating embeddings"
        );

        let started = Instant::now();
        let outcome = self.embed_object(&object, &definitions).await;
        let secs = started.elapsed().as_secs_f64();

        if let Err(error) = self
            .store
            .record_time_metric(
                MetricEvent::GenerateEmbeddings,
                secs,
                Some(&format!("Generated embeddings for '{}'", object.name)),
                Some(&format!(
                    "object '{}' with {} definition(s)",
                    object.id,
                    definitions.len()
                )),
            )
            .await
        {
            tracing::warn!(%error, "failed to record embedding metric");
        }

        outcome?;
        Ok(true)
    }

    async fn embed_object(&self, object: &FileObject, definitions: &[Definition]) -> Result<()> {
        let document = compose_document(object, definitions);
        self.index
            .upsert(object.id, &document, &ObjectPointer::from(object))
            .await?;
        self.store.mark_embedded(object.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(32);

        let a = embedder
            .embed(vec!["red apple".to_string()])
            .expect("embed")
            .remove(0);
        let b = embedder
            .embed(vec!["red apple".to_string()])
            .expect("embed")
            .remove(0);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_land_closer_than_unrelated_ones() {
        let embedder = HashingEmbedder::new(64);
        let embed = |text: &str| {
            embedder
                .embed(vec![text.to_string()])
                .expect("embed")
                .remove(0)
        };

        let distance = |a: &[f32], b: &[f32]| -> f32 {
            a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
        };

        let query = embed("red apple");
        let exact = embed("red apple");
        let partial = embed("red balloon");
        let unrelated = embed("quarterly earnings report");

        assert!(distance(&query, &exact) < distance(&query, &partial));
        assert!(distance(&query, &partial) < distance(&query, &unrelated));
    }

    #[test]
    fn document_layout_is_name_path_then_definitions() {
        use chrono::Utc;
        use uuid::Uuid;

        let object = FileObject {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            object_type: "image".to_string(),
            path: "/photos/cat.png".to_string(),
            name: "cat.png".to_string(),
            file_id: "dev-cat".to_string(),
            file_created_at: Utc::now(),
            metadata: serde_json::Value::Null,
            processed: true,
            generated_embeddings: false,
            last_processed_at: None,
            error: false,
            error_detail: None,
        };
        let definition = Definition {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            object_id: object.id,
            definition_type: "image-description".to_string(),
            content: "a cat on a sofa".to_string(),
            processing_secs: 0.2,
            model: None,
        };

        let document = compose_document(&object, &[definition]);
        assert_eq!(
            document,
            "File name: cat.png\nFile path: /photos/cat.png\na cat on a sofa"
        );
    }
}
