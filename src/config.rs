//! Configuration types, built from environment variables.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default listen address for the inbound HTTP trigger.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default chat-completions endpoint for the external classifier.
pub const DEFAULT_CLASSIFIER_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default classifier model.
pub const DEFAULT_CLASSIFIER_MODEL: &str = "gpt-4o-mini";

/// Default upper bound on a single classifier call.
pub const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 6;

/// Where accepted records are posted.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Ingestion endpoint on the app backend.
    pub ingest_url: String,
    /// Shared secret sent as the `x-worker-secret` header.
    pub worker_secret: SecretString,
}

/// External classifier settings. Absent ⇒ keyword-only operation.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub model: String,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub backend: BackendConfig,
    pub classifier: Option<ClassifierConfig>,
    /// Where sender-verification notices are forwarded. Absent ⇒ log only.
    pub forward_url: Option<String>,
    /// When set, inbound recipients must use this domain.
    pub inbound_domain: Option<String>,
    /// Deadline applied to every classifier call.
    pub classifier_deadline: Duration,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// The backend URL and worker secret are required; everything else
    /// has a default or degrades a feature when absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr =
            std::env::var("FINMAIL_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        // Records go to the backend's transactions endpoint.
        let ingest_url = std::env::var("FINMAIL_BACKEND_URL")
            .map_err(|_| ConfigError::MissingEnvVar("FINMAIL_BACKEND_URL".to_string()))
            .map(|base| format!("{}/transactions", base.trim_end_matches('/')))?;

        let worker_secret = std::env::var("FINMAIL_WORKER_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("FINMAIL_WORKER_SECRET".to_string()))?;

        let classifier = std::env::var("FINMAIL_CLASSIFIER_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|key| ClassifierConfig {
                api_url: std::env::var("FINMAIL_CLASSIFIER_URL")
                    .unwrap_or_else(|_| DEFAULT_CLASSIFIER_URL.to_string()),
                api_key: SecretString::from(key),
                model: std::env::var("FINMAIL_CLASSIFIER_MODEL")
                    .unwrap_or_else(|_| DEFAULT_CLASSIFIER_MODEL.to_string()),
            });

        let classifier_deadline = match std::env::var("FINMAIL_CLASSIFIER_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "FINMAIL_CLASSIFIER_TIMEOUT_SECS".to_string(),
                    message: format!("expected a number of seconds, got {raw:?}"),
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_CLASSIFIER_TIMEOUT_SECS),
        };

        let forward_url = std::env::var("FINMAIL_FORWARD_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let inbound_domain = std::env::var("FINMAIL_INBOUND_DOMAIN")
            .ok()
            .map(|domain| domain.trim().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty());

        Ok(Self {
            bind_addr,
            backend: BackendConfig {
                ingest_url,
                worker_secret: SecretString::from(worker_secret),
            },
            classifier,
            forward_url,
            inbound_domain,
            classifier_deadline,
        })
    }
}
