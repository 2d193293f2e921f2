//! Classification collaborator
//!
//! The pipeline only sees the [`Classifier`] trait. The HTTP implementation
//! talks to an Ollama-compatible generate endpoint; the disabled one fails
//! every call so complaints take the fallback path.

mod ollama;

pub use ollama::OllamaClassifier;

use crate::complaints::Priority;
use crate::config::Config;
use crate::department::Department;
use crate::error::{CivicError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input to a classification call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRequest {
    pub description: String,
    /// Role of the filing actor; affects department normalization
    pub role: Option<String>,
}

impl ClassificationRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }
}

/// Normalized collaborator answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub department: Department,
    pub priority: Priority,
    /// Comma separated tags, possibly empty
    pub tags: String,
    /// Self-reported confidence in [0, 1]
    pub confidence: f64,
}

/// External classification service
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one complaint. Any error is treated as "collaborator failed".
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Classifier that always fails
#[derive(Debug, Default, Clone)]
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn classify(&self, _request: &ClassificationRequest) -> Result<ClassificationResult> {
        Err(CivicError::Classifier(
            "classification is disabled".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Build the classifier described by `config.classifier`
pub fn from_config(config: &Config) -> Result<Arc<dyn Classifier>> {
    let default_department = config.default_department();
    let config = &config.classifier;
    if !config.enabled {
        tracing::info!("Classifier disabled, complaints will take the fallback path");
        return Ok(Arc::new(DisabledClassifier));
    }

    let classifier = OllamaClassifier::new(&config.endpoint, &config.model, config.timeout()?)?
        .with_default_department(default_department);
    tracing::info!(
        "Classifier: {} via {}",
        config.model,
        config.endpoint
    );
    Ok(Arc::new(classifier))
}
