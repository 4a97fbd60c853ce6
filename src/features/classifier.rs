//! Seam to the on-device image classifier.
//!
//! The inference engine itself lives on the platform side. [`HostClassifier`]
//! forwards each request to the host and suspends until the host reports
//! back. [`FixedLabelClassifier`] answers without any model, which is what the
//! demo build of the app shipped.

use crate::features::capture::CapturedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("failed to load model `{0}`")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("classification request was dropped before completing")]
    Cancelled,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// One-shot classification. Candidates may come back in any order.
    async fn classify(
        &self,
        image: &CapturedImage,
        model_identifier: &str,
    ) -> Result<Vec<Prediction>, ClassifierError>;
}

/// Always answers with the same label at full confidence.
#[derive(Debug, Clone)]
pub struct FixedLabelClassifier {
    label: String,
}

impl FixedLabelClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl Classifier for FixedLabelClassifier {
    async fn classify(
        &self,
        _image: &CapturedImage,
        model_identifier: &str,
    ) -> Result<Vec<Prediction>, ClassifierError> {
        tracing::debug!(model = model_identifier, label = %self.label, "fixed classifier answering");
        Ok(vec![Prediction::new(self.label.clone(), 1.0)])
    }
}

/// What the host needs to run one inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub model_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub width: u32,
    pub height: u32,
}

type Reply = Result<Vec<Prediction>, ClassifierError>;

#[derive(Default)]
struct HostQueues {
    outbox: Vec<InferenceRequest>,
    pending: HashMap<Uuid, oneshot::Sender<Reply>>,
}

/// Classifier whose inference is done by the host app.
#[derive(Default)]
pub struct HostClassifier {
    queues: Mutex<HostQueues>,
}

impl HostClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HostQueues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requests not yet handed to the host. Each request is returned once.
    pub fn drain_requests(&self) -> Vec<InferenceRequest> {
        std::mem::take(&mut self.queues().outbox)
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.queues().pending.len()
    }

    /// Deliver the host's answer. Returns `false` for unknown or
    /// already-completed ids.
    pub fn complete(&self, id: Uuid, outcome: Result<Vec<Prediction>, ClassifierError>) -> bool {
        let sender = {
            let mut queues = self.queues();
            queues.outbox.retain(|r| r.id != id);
            queues.pending.remove(&id)
        };
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::warn!(%id, "inference result arrived after the request was dropped");
                    return false;
                }
                true
            }
            None => {
                tracing::warn!(%id, "inference result for unknown request");
                false
            }
        }
    }

    /// Drop every outstanding request; waiting classifications fail with
    /// [`ClassifierError::Cancelled`].
    pub fn cancel_all(&self) -> usize {
        let mut queues = self.queues();
        queues.outbox.clear();
        let dropped = queues.pending.len();
        queues.pending.clear();
        dropped
    }
}

#[async_trait]
impl Classifier for HostClassifier {
    async fn classify(
        &self,
        image: &CapturedImage,
        model_identifier: &str,
    ) -> Result<Vec<Prediction>, ClassifierError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut queues = self.queues();
            queues.pending.insert(id, tx);
            queues.outbox.push(InferenceRequest {
                id,
                model_identifier: model_identifier.to_string(),
                image_path: image.source_path().map(str::to_string),
                width: image.width(),
                height: image.height(),
            });
        }
        tracing::debug!(%id, model = model_identifier, "waiting for host inference");

        rx.await.unwrap_or(Err(ClassifierError::Cancelled))
    }
}
