use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{CivicError, Result, ValidationError};
use std::time::Duration;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_classifier(config, &mut errors);
        Self::validate_pipeline(config, &mut errors);
        Self::validate_clustering(config, &mut errors);
        Self::validate_daemon(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CivicError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_classifier(config: &Config, errors: &mut Vec<ValidationError>) {
        let classifier = &config.classifier;

        match parse_duration(&classifier.timeout) {
            Ok(d) if d.is_zero() => errors.push(ValidationError::new(
                "classifier.timeout",
                "Timeout must be greater than 0",
            )),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                "classifier.timeout",
                format!("Invalid duration format: {}", classifier.timeout),
            )),
        }

        if classifier.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "classifier.max_concurrent",
                "Concurrency limit must be greater than 0",
            ));
        }

        // Endpoint and model only matter when calls will actually be made
        if classifier.enabled {
            if !(classifier.endpoint.starts_with("http://")
                || classifier.endpoint.starts_with("https://"))
            {
                errors.push(ValidationError::new(
                    "classifier.endpoint",
                    format!("Endpoint must be an http(s) URL, got '{}'", classifier.endpoint),
                ));
            }

            if classifier.model.trim().is_empty() {
                errors.push(ValidationError::new(
                    "classifier.model",
                    "Model name cannot be empty",
                ));
            }
        }
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.pipeline.queue_size == 0 {
            errors.push(ValidationError::new(
                "pipeline.queue_size",
                "Queue size must be greater than 0",
            ));
        }

        if config
            .pipeline
            .ambiguous_categories
            .iter()
            .any(|c| c.trim().is_empty())
        {
            errors.push(ValidationError::new(
                "pipeline.ambiguous_categories",
                "Ambiguous categories cannot contain empty entries",
            ));
        }

        if !config.default_department().is_civic() {
            errors.push(ValidationError::new(
                "pipeline.default_department",
                format!(
                    "Default department must be one of {:?}, got '{}'",
                    crate::department::VALID_LABELS,
                    config.pipeline.default_department
                ),
            ));
        }
    }

    fn validate_clustering(config: &Config, errors: &mut Vec<ValidationError>) {
        let threshold = config.clustering.threshold_degrees;
        if !threshold.is_finite() || threshold < 0.0 {
            errors.push(ValidationError::new(
                "clustering.threshold_degrees",
                format!("Threshold must be a non-negative number, got {}", threshold),
            ));
        }
    }

    fn validate_daemon(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.daemon.max_connections == 0 {
            errors.push(ValidationError::new(
                "daemon.max_connections",
                "Max connections must be greater than 0",
            ));
        }

        if config.daemon.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "daemon.socket_path",
                "Socket path cannot be empty",
            ));
        }
    }
}

/// Parse duration strings like "500ms", "30s", "2m", "1h"; bare digits are seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || CivicError::InvalidConfigValue {
        path: "duration".to_string(),
        message: format!("Invalid duration format: '{}'", s),
    };

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(invalid()),
    }
}
