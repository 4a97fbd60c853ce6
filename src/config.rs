//! Core configuration.
//!
//! The host sends this once with the `init` command. It is resolved before the
//! core starts so later commands never read anything process-wide.

use crate::features::selection::DEFAULT_EVENT_CAPACITY;
use crate::features::test_type::{classifier_config, TestType, DEFAULT_TEST_TYPE};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which engine answers classification requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    /// Inference runs in the host app; the core asks for it and waits.
    Host,
    /// Every capture gets the same label. Used for demo builds.
    Fixed { label: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// URL scheme registered by the app, without `://`.
    pub link_scheme: Option<String>,
    pub default_test_type: TestType,
    pub event_capacity: usize,
    pub classifier: ClassifierMode,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Longest side of the result screen thumbnail, in pixels.
    pub thumbnail_max_side: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            link_scheme: Some("testtt".into()),
            default_test_type: DEFAULT_TEST_TYPE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            classifier: ClassifierMode::Host,
            log_level: "info".into(),
            thumbnail_max_side: 256,
        }
    }
}

impl CoreConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_test_type.is_set() {
            return Err(ConfigError::Invalid(
                "default_test_type cannot be unset".into(),
            ));
        }
        if classifier_config(self.default_test_type).is_none() {
            // Allowed, but every capture before a scan will fail.
            tracing::warn!(
                test_type = %self.default_test_type,
                "default test type has no classifier model"
            );
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        if self.thumbnail_max_side == 0 {
            return Err(ConfigError::Invalid(
                "thumbnail_max_side must be > 0".into(),
            ));
        }
        if let ClassifierMode::Fixed { label } = &self.classifier {
            if label.trim().is_empty() {
                return Err(ConfigError::Invalid("fixed classifier label is empty".into()));
            }
        }
        Ok(())
    }
}
