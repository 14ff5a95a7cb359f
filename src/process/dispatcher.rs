//! The dispatcher: routes unprocessed objects through matching processors.

use super::ProcessorRegistry;
use crate::error::Result;
use crate::store::{Definition, ErrorEvent, FileObject, Store};
use std::sync::Arc;

/// How the `processed` flag is determined when several processors match one
/// object's type.
///
/// The pipeline runs with [`ProcessedPolicy::AnySuccess`]: a single
/// succeeding processor is enough, since its definition row exists whether
/// or not a later processor fails. [`ProcessedPolicy::LastSuccess`] keeps
/// the alternative reading, where only the final processor's outcome counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedPolicy {
    AnySuccess,
    LastSuccess,
}

/// Routes eligible objects through the processors targeting their type.
pub struct Dispatcher {
    store: Store,
    registry: Arc<ProcessorRegistry>,
    policy: ProcessedPolicy,
}

impl Dispatcher {
    pub fn new(store: Store, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            store,
            registry,
            policy: ProcessedPolicy::AnySuccess,
        }
    }

    pub fn with_policy(mut self, policy: ProcessedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pick one eligible object at random and dispatch it. Returns whether
    /// an object was found.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(object) = self.store.random_unprocessed_object().await? else {
            return Ok(false);
        };

        self.dispatch(&object).await?;
        Ok(true)
    }

    /// Run every matching processor against the object, recording
    /// definitions and failures as they come.
    pub async fn dispatch(&self, object: &FileObject) -> Result<Vec<Definition>> {
        tracing::info!(id = %object.id, name = %object.name, "processing object");

        let matching = self.registry.matching(&object.object_type);
        let mut definitions = Vec::new();
        let mut outcomes = Vec::new();

        for processor in matching {
            tracing::debug!(
                processor = processor.id(),
                object = %object.id,
                "running processor"
            );

            match processor.process(object).await {
                Ok(draft) => {
                    let definition = self.store.insert_definition(object.id, draft).await?;
                    tracing::debug!(
                        processor = processor.id(),
                        definition = %definition.id,
                        "processor produced a definition"
                    );
                    definitions.push(definition);
                    outcomes.push(true);
                }
                Err(error) => {
                    tracing::error!(
                        processor = processor.id(),
                        object = %object.id,
                        %error,
                        "processor failed"
                    );

                    if let Err(log_error) = self
                        .store
                        .record_error(
                            ErrorEvent::ProcessingObjectFailed,
                            &format!("Processing object '{}' failed", object.name),
                            Some(&format!(
                                "processor '{}' failed on object '{}'",
                                processor.id(),
                                object.id
                            )),
                            Some(&error.to_string()),
                            Some(serde_json::json!({
                                "object_id": object.id.to_string(),
                                "processor": processor.id(),
                            })),
                        )
                        .await
                    {
                        tracing::warn!(error = %log_error, "failed to record processor failure");
                    }

                    self.store.mark_error(object.id, &error.to_string()).await?;
                    outcomes.push(false);
                }
            }
        }

        let processed = match self.policy {
            ProcessedPolicy::AnySuccess => outcomes.iter().any(|&ok| ok),
            ProcessedPolicy::LastSuccess => outcomes.last().copied().unwrap_or(false),
        };
        if processed {
            self.store.mark_processed(object.id).await?;
        }

        Ok(definitions)
    }
}
