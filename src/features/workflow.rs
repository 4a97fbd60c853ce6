//! Capture → classification → result record.
//!
//! One call is one linear pass: resolve the test type, pick the model, await
//! the classifier once, keep the best candidate. Nothing is kept between calls
//! and nothing is retried.

use crate::features::capture::{CapturedImage, Coordinate};
use crate::features::classifier::{Classifier, Prediction};
use crate::features::selection::TestSelection;
use crate::features::test_type::{classifier_config, TestType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const SELECT_TEST_TYPE_MESSAGE: &str =
    "Please select a test type (e.g., COVID or Pregnancy) before scanning.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("no test type selected")]
    NoTestTypeSelected,
    #[error("no classifier available for test type `{0}`")]
    UnsupportedTestType(TestType),
    #[error("classifier returned no predictions")]
    NoClassificationResult,
    #[error("classifier failed: {0}")]
    ClassifierFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    NoTestTypeSelected,
    UnsupportedTestType,
    NoClassificationResult,
    ClassifierFailed,
}

impl WorkflowError {
    pub fn kind(&self) -> WorkflowErrorKind {
        match self {
            WorkflowError::NoTestTypeSelected => WorkflowErrorKind::NoTestTypeSelected,
            WorkflowError::UnsupportedTestType(_) => WorkflowErrorKind::UnsupportedTestType,
            WorkflowError::NoClassificationResult => WorkflowErrorKind::NoClassificationResult,
            WorkflowError::ClassifierFailed(_) => WorkflowErrorKind::ClassifierFailed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind() {
            WorkflowErrorKind::NoTestTypeSelected => "no_test_type_selected",
            WorkflowErrorKind::UnsupportedTestType => "unsupported_test_type",
            WorkflowErrorKind::NoClassificationResult => "no_classification_result",
            WorkflowErrorKind::ClassifierFailed => "classifier_failed",
        }
    }

    /// Text the result consumer can show as-is.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::NoTestTypeSelected => SELECT_TEST_TYPE_MESSAGE.to_string(),
            WorkflowError::UnsupportedTestType(t) => {
                format!("Scanning is not available yet for {t} tests.")
            }
            WorkflowError::NoClassificationResult => "Unable to classify image.".to_string(),
            WorkflowError::ClassifierFailed(details) => {
                format!("Error classifying image: {details}")
            }
        }
    }
}

/// Where a single run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Resolving,
    Classifying,
    Succeeded,
    Failed(WorkflowErrorKind),
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    id: Uuid,
    label: String,
    confidence: f32,
    test_type: TestType,
    auxiliary_fields: Vec<String>,
    captured_at: DateTime<Utc>,
    location: Option<Coordinate>,
    image: CapturedImage,
}

impl ClassificationResult {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// The type the model was chosen for, which is the default when no
    /// selection existed.
    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    pub fn auxiliary_fields(&self) -> &[String] {
        &self.auxiliary_fields
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn location(&self) -> Option<Coordinate> {
        self.location
    }

    pub fn image(&self) -> &CapturedImage {
        &self.image
    }
}

pub struct ClassificationWorkflow {
    classifier: Arc<dyn Classifier>,
    default_test_type: TestType,
}

impl ClassificationWorkflow {
    pub fn new(classifier: Arc<dyn Classifier>, default_test_type: TestType) -> Self {
        Self {
            classifier,
            default_test_type,
        }
    }

    #[cfg(test)]
    pub fn with_default_test_type(classifier: Arc<dyn Classifier>) -> Self {
        Self::new(classifier, crate::features::test_type::DEFAULT_TEST_TYPE)
    }

    pub fn default_test_type(&self) -> TestType {
        self.default_test_type
    }

    /// Test type a run would use for `selection`.
    pub fn resolve(&self, selection: Option<&TestSelection>) -> Result<TestType, WorkflowError> {
        match selection {
            None => Ok(self.default_test_type),
            Some(s) if !s.test_type().is_set() => Err(WorkflowError::NoTestTypeSelected),
            Some(s) => Ok(s.test_type()),
        }
    }

    pub async fn run(
        &self,
        image: CapturedImage,
        selection: Option<&TestSelection>,
        location: Option<Coordinate>,
        captured_at: DateTime<Utc>,
    ) -> Result<ClassificationResult, WorkflowError> {
        self.run_with_progress(image, selection, location, captured_at, &mut |_| {})
            .await
    }

    pub async fn run_with_progress(
        &self,
        image: CapturedImage,
        selection: Option<&TestSelection>,
        location: Option<Coordinate>,
        captured_at: DateTime<Utc>,
        progress: &mut (dyn FnMut(WorkflowPhase) + Send),
    ) -> Result<ClassificationResult, WorkflowError> {
        let outcome = self
            .classify_once(image, selection, location, captured_at, progress)
            .await;
        match &outcome {
            Ok(result) => {
                tracing::info!(
                    id = %result.id,
                    test_type = %result.test_type,
                    label = %result.label,
                    confidence = result.confidence,
                    "classification succeeded"
                );
                progress(WorkflowPhase::Succeeded);
            }
            Err(err) => {
                tracing::warn!(error = %err, "classification failed");
                progress(WorkflowPhase::Failed(err.kind()));
            }
        }
        outcome
    }

    async fn classify_once(
        &self,
        image: CapturedImage,
        selection: Option<&TestSelection>,
        location: Option<Coordinate>,
        captured_at: DateTime<Utc>,
        progress: &mut (dyn FnMut(WorkflowPhase) + Send),
    ) -> Result<ClassificationResult, WorkflowError> {
        progress(WorkflowPhase::Resolving);
        let test_type = self.resolve(selection)?;
        if selection.is_none() {
            tracing::debug!(%test_type, "no selection yet, using default test type");
        }
        let config =
            classifier_config(test_type).ok_or(WorkflowError::UnsupportedTestType(test_type))?;

        progress(WorkflowPhase::Classifying);
        let predictions = self
            .classifier
            .classify(&image, config.model_identifier)
            .await
            .map_err(|e| WorkflowError::ClassifierFailed(e.to_string()))?;

        let best = best_prediction(predictions).ok_or(WorkflowError::NoClassificationResult)?;

        Ok(ClassificationResult {
            id: Uuid::new_v4(),
            label: best.label,
            confidence: best.confidence,
            test_type,
            auxiliary_fields: selection
                .map(|s| s.auxiliary_fields().to_vec())
                .unwrap_or_default(),
            captured_at,
            location,
            image,
        })
    }
}

/// Highest confidence wins; on a tie the earlier candidate stays. A NaN
/// confidence only wins when nothing else is present.
fn best_prediction(predictions: Vec<Prediction>) -> Option<Prediction> {
    predictions.into_iter().reduce(|best, next| {
        let better = match (best.confidence.is_nan(), next.confidence.is_nan()) {
            (true, false) => true,
            (false, false) => next.confidence > best.confidence,
            _ => false,
        };
        if better {
            next
        } else {
            best
        }
    })
}
