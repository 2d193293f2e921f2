//! HTTP classifier against an Ollama-style `/api/generate` endpoint

use super::{ClassificationRequest, ClassificationResult, Classifier};
use crate::complaints::Priority;
use crate::department::{normalize_department_or, Department};
use crate::error::{CivicError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const SYSTEM_PROMPT: &str = r#"You route complaints for a municipal complaint desk.
Read the complaint and answer with:
1. department: exactly one of "KSEB", "Water Authority", "PWD", "Corporation"
2. priority: High, Medium or Low
3. tags: up to 3 comma separated keywords
4. confidence: a number from 0.0 to 1.0

Departments:
- KSEB: electricity, poles, wires, power failure
- Water Authority: water supply, pipes, leakage, drainage and sewage
- PWD: roads, bridges, potholes, public buildings
- Corporation: waste, garbage, animal nuisance, public health, taxes

Reply with JSON only, for example:
{"department": "PWD", "priority": "High", "tags": "pothole, road", "confidence": 0.9}"#;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
}

/// Classifier backed by a local or remote LLM server
pub struct OllamaClassifier {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    default_department: Department,
}

impl OllamaClassifier {
    /// `timeout` bounds the whole HTTP exchange
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CivicError::Classifier(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            default_department: Department::DEFAULT,
        })
    }

    /// Department for answers that name nothing recognisable
    pub fn with_default_department(mut self, department: Department) -> Self {
        self.default_department = department;
        self
    }

    fn prompt(description: &str) -> String {
        format!(
            "{}\n\nComplaint: \"{}\"\n\nJSON Output:",
            SYSTEM_PROMPT, description
        )
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: Self::prompt(&request.description),
            stream: false,
            format: "json",
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CivicError::Classifier(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CivicError::Classifier(format!("HTTP {}: {}", status, text)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| CivicError::Classifier(format!("Invalid response body: {}", e)))?;

        parse_generation(&value, request.role.as_deref(), &self.default_department)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Turn a generate-endpoint body into a normalized result.
///
/// The model's answer sits in `response`, either as JSON text or already as
/// an object. A body without `response` is read as the answer itself.
pub(crate) fn parse_generation(
    body: &Value,
    role: Option<&str>,
    fallback: &Department,
) -> Result<ClassificationResult> {
    let answer = match body.get("response") {
        Some(Value::String(text)) => serde_json::from_str::<Value>(text).map_err(|e| {
            CivicError::Classifier(format!("Unparsable model output ({}): {}", e, text))
        })?,
        Some(Value::Null) | None => body.clone(),
        Some(other) => other.clone(),
    };

    let Value::Object(fields) = answer else {
        return Err(CivicError::Classifier(
            "Model output is not a JSON object".to_string(),
        ));
    };

    let department = normalize_department_or(
        fields.get("department").and_then(Value::as_str),
        role,
        fallback,
    );

    let priority = fields
        .get("priority")
        .and_then(Value::as_str)
        .and_then(Priority::parse_lenient)
        .unwrap_or(Priority::Medium);

    let tags = match fields.get("tags") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };

    let confidence = fields
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.5);

    Ok(ClassificationResult {
        department,
        priority,
        tags,
        confidence,
    })
}
