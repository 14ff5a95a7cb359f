//! The built-in image captioning processor.
//!
//! Sends the image bytes to the configured caption endpoint and turns the
//! returned caption into an `image-description` definition. The model
//! itself lives behind the endpoint; this side only knows the wire shape.

use super::{FileProcessor, ProcessorContext, ProcessorManifest};
use crate::error::{ProcessError, Result};
use crate::store::{DefinitionDraft, FileObject, MetricEvent};
use base64::Engine as _;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
}

pub struct ImageCaptionProcessor {
    manifest: ProcessorManifest,
    ctx: ProcessorContext,
}

impl ImageCaptionProcessor {
    pub fn new(manifest: ProcessorManifest, ctx: ProcessorContext) -> Self {
        Self { manifest, ctx }
    }

    fn verify_object(&self, object: &FileObject) -> Result<()> {
        if object.object_type != self.target_type() {
            return Err(ProcessError::TypeMismatch {
                expected: self.target_type().to_string(),
                got: object.object_type.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn request_caption(&self, object: &FileObject) -> Result<String> {
        let failed = |detail: String| ProcessError::Failed {
            processor: self.id().to_string(),
            detail,
        };

        let bytes = tokio::fs::read(&object.path)
            .await
            .map_err(|e| failed(format!("failed to read '{}': {e}", object.path)))?;

        let payload = serde_json::json!({
            "model": self.manifest.model,
            "gpu": self.manifest.gpu,
            "image": base64::engine::general_purpose::STANDARD.encode(&bytes),
        });

        let response = self
            .ctx
            .http
            .post(&self.ctx.caption_endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| failed(format!("caption request failed: {e}")))?
            .error_for_status()
            .map_err(|e| failed(format!("caption endpoint rejected the request: {e}")))?;

        let caption: CaptionResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid caption response: {e}")))?;

        Ok(caption.caption)
    }
}

#[async_trait::async_trait]
impl FileProcessor for ImageCaptionProcessor {
    fn id(&self) -> &str {
        "image"
    }

    fn target_type(&self) -> &str {
        "image"
    }

    fn title(&self) -> &str {
        "Image captioning"
    }

    async fn process(&self, object: &FileObject) -> Result<DefinitionDraft> {
        self.verify_object(object)?;

        let started = Instant::now();
        let caption = self.request_caption(object).await?;
        let secs = started.elapsed().as_secs_f64();

        tracing::info!(
            object = %object.id,
            caption = %caption,
            "generated image caption"
        );
        if let Err(error) = self
            .ctx
            .store
            .record_time_metric(
                MetricEvent::GenerateImageCaption,
                secs,
                Some("Generated image caption"),
                Some(&format!(
                    "generated a caption for object '{}' ({})",
                    object.name, object.id
                )),
            )
            .await
        {
            tracing::warn!(%error, "failed to record caption metric");
        }

        Ok(DefinitionDraft {
            definition_type: "image-description".to_string(),
            content: caption,
            processing_secs: secs,
            model: Some(self.manifest.model.clone()),
        })
    }
}
