//! Pluggable content processors.
//!
//! A processor is declared by a `<id>.toml` manifest in the processor
//! directory; the manifest id selects a compiled-in implementation and
//! carries its configuration (model reference, GPU flag, enabled flag).
//! A manifest that fails to load is recorded and skipped, loading
//! continues for the rest.

pub mod caption;
pub mod dispatcher;

pub use caption::ImageCaptionProcessor;
pub use dispatcher::{Dispatcher, ProcessedPolicy};

use crate::error::Result;
use crate::store::{DefinitionDraft, ErrorEvent, FileObject, Store};
use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// A type-scoped analyzer producing definitions from file objects.
#[async_trait::async_trait]
pub trait FileProcessor: Send + Sync {
    /// Stable processor id; also the manifest file stem.
    fn id(&self) -> &str;
    /// The classification tag this processor targets.
    fn target_type(&self) -> &str;
    /// Human-readable title for logs and metadata.
    fn title(&self) -> &str;
    /// Analyze one object and produce a definition.
    async fn process(&self, object: &FileObject) -> Result<DefinitionDraft>;
}

/// Parsed `<id>.toml` processor manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorManifest {
    /// Model reference handed to the backing implementation.
    pub model: String,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Shared collaborators handed to processor constructors.
#[derive(Clone)]
pub struct ProcessorContext {
    pub store: Store,
    pub http: reqwest::Client,
    pub caption_endpoint: String,
}

/// The set of loaded processors.
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn FileProcessor>>,
}

impl ProcessorRegistry {
    /// Load all processors declared in `directory`.
    pub async fn load(directory: &Path, ctx: &ProcessorContext) -> Self {
        let mut processors: Vec<Arc<dyn FileProcessor>> = Vec::new();
        let mut attempted = 0;

        let mut entries = match tokio::fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    path = %directory.display(),
                    %error,
                    "processor directory unreadable, no processors loaded"
                );
                return Self { processors };
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "failed to enumerate processor directory");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            attempted += 1;

            match load_processor(&id, &path, ctx).await {
                Ok(Some(processor)) => {
                    tracing::debug!(id = %id, "loaded processor");
                    processors.push(processor);
                }
                Ok(None) => {
                    tracing::debug!(id = %id, "processor disabled, skipping");
                }
                Err(error) => {
                    tracing::warn!(
                        id = %id,
                        path = %path.display(),
                        error = %format!("{error:#}"),
                        "failed to load processor, skipping"
                    );
                    if let Err(log_error) = ctx
                        .store
                        .record_error(
                            ErrorEvent::ProcessorLoadFailed,
                            "Processor failed to load",
                            Some(&format!("loading processor '{id}' failed")),
                            Some(&format!("{error:#}")),
                            Some(serde_json::json!({
                                "processor": id,
                                "path": path.display().to_string(),
                            })),
                        )
                        .await
                    {
                        tracing::warn!(error = %log_error, "failed to record load failure");
                    }
                }
            }
        }

        tracing::info!(
            loaded = processors.len(),
            attempted,
            "processor loading complete"
        );
        Self { processors }
    }

    /// Build a registry from already-constructed processors.
    pub fn with_processors(processors: Vec<Arc<dyn FileProcessor>>) -> Self {
        Self { processors }
    }

    /// All enabled processors targeting the given classification tag.
    pub fn matching(&self, object_type: &str) -> Vec<Arc<dyn FileProcessor>> {
        self.processors
            .iter()
            .filter(|p| p.target_type() == object_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

async fn load_processor(
    id: &str,
    path: &Path,
    ctx: &ProcessorContext,
) -> anyhow::Result<Option<Arc<dyn FileProcessor>>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let manifest: ProcessorManifest =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

    if !manifest.enabled {
        return Ok(None);
    }

    build_processor(id, manifest, ctx).map(Some)
}

/// Manifest ids map onto compiled-in constructors here.
fn build_processor(
    id: &str,
    manifest: ProcessorManifest,
    ctx: &ProcessorContext,
) -> anyhow::Result<Arc<dyn FileProcessor>> {
    match id {
        "image" => Ok(Arc::new(ImageCaptionProcessor::new(manifest, ctx.clone()))),
        other => anyhow::bail!("no processor implementation registered for '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context(store: Store) -> ProcessorContext {
        ProcessorContext {
            store,
            http: reqwest::Client::new(),
            caption_endpoint: "http://127.0.0.1:1/caption".to_string(),
        }
    }

    #[test]
    fn manifest_defaults() {
        let manifest: ProcessorManifest =
            toml::from_str(r#"model = "blip-base""#).expect("parse manifest");
        assert_eq!(manifest.model, "blip-base");
        assert!(!manifest.gpu);
        assert!(manifest.enabled);

        let manifest: ProcessorManifest = toml::from_str(
            r#"
model = "blip-large"
gpu = true
enabled = false
"#,
        )
        .expect("parse manifest");
        assert!(manifest.gpu);
        assert!(!manifest.enabled);
    }

    #[tokio::test]
    async fn broken_manifests_are_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("image.toml"), r#"model = "blip-base""#)
            .expect("write valid manifest");
        std::fs::write(dir.path().join("broken.toml"), "model = [not toml")
            .expect("write broken manifest");
        std::fs::write(dir.path().join("unknown.toml"), r#"model = "whatever""#)
            .expect("write unknown manifest");
        std::fs::write(dir.path().join("README.md"), "not a manifest").expect("write readme");

        let store = Store::open_in_memory().await.expect("open store");
        let registry = ProcessorRegistry::load(dir.path(), &test_context(store.clone())).await;

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.matching("image").len(), 1);
        assert_eq!(
            store
                .count_errors(ErrorEvent::ProcessorLoadFailed)
                .await
                .expect("count"),
            2
        );
    }

    #[tokio::test]
    async fn disabled_processors_are_skipped_silently() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("image.toml"),
            r#"
model = "blip-base"
enabled = false
"#,
        )
        .expect("write manifest");

        let store = Store::open_in_memory().await.expect("open store");
        let registry = ProcessorRegistry::load(dir.path(), &test_context(store.clone())).await;

        assert!(registry.is_empty());
        assert_eq!(
            store
                .count_errors(ErrorEvent::ProcessorLoadFailed)
                .await
                .expect("count"),
            0
        );
    }
}
