//! External classifier integration.
//!
//! The pipeline needs one narrow capability from a language model:
//! send a short prompt, get a short token back. Call sites wrap every
//! call in [`ask_bounded`] and treat any error as a signal to use
//! their deterministic fallback, so a slow or dead provider can never
//! stall an invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::ClassifierError;

/// Instruction sent as the system message on every call.
const SYSTEM_PROMPT: &str = "Sos un clasificador de notificaciones bancarias. \
     Respondé únicamente con el token pedido, sin explicaciones.";

// ── Trait ───────────────────────────────────────────────────────────

/// Minimal completion interface the pipeline depends on.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Provider name for diagnostics.
    fn name(&self) -> &str;

    /// Send one prompt and return the raw text answer.
    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError>;
}

/// Wrap a classifier call in a hard deadline.
pub async fn ask_bounded(
    classifier: &dyn Classifier,
    prompt: &str,
    deadline: Duration,
) -> Result<String, ClassifierError> {
    match tokio::time::timeout(deadline, classifier.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(ClassifierError::Timeout { timeout: deadline }),
    }
}

/// Build the configured classifier, or the disabled one when no
/// configuration is present.
pub fn create_classifier(
    config: Option<&ClassifierConfig>,
) -> Result<Arc<dyn Classifier>, ClassifierError> {
    match config {
        Some(config) => {
            tracing::info!(model = %config.model, "classifier enabled");
            Ok(Arc::new(HttpClassifier::new(config)?))
        }
        None => {
            tracing::warn!("no classifier API key configured, keyword fallbacks only");
            Ok(Arc::new(Disabled))
        }
    }
}

// ── HTTP classifier ─────────────────────────────────────────────────

/// Chat-completions classifier over plain HTTP.
pub struct HttpClassifier {
    http: reqwest::Client,
    api_url: String,
    api_key: secrecy::SecretString,
    model: String,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        // Transport timeouts sit above the per-call deadline so the
        // deadline is what callers actually observe.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClassifierError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: 24,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ClassifierError::InvalidResponse {
                    reason: format!("bad JSON: {e}"),
                })?;
        let answer = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();
        if answer.is_empty() {
            return Err(ClassifierError::InvalidResponse {
                reason: "empty completion".to_string(),
            });
        }
        Ok(answer)
    }
}

// ── Disabled classifier ─────────────────────────────────────────────

/// Always-failing classifier used when no API key is configured.
/// Callers fall through to their keyword paths.
pub struct Disabled;

#[async_trait]
impl Classifier for Disabled {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ClassifierError> {
        Err(ClassifierError::Disabled {
            reason: "no API key configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ClassifierError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("transaccion".to_string())
        }
    }

    #[tokio::test]
    async fn disabled_classifier_always_errors() {
        let result = Disabled.complete("anything").await;
        assert!(matches!(result, Err(ClassifierError::Disabled { .. })));
    }

    #[tokio::test]
    async fn ask_bounded_enforces_deadline() {
        let result = ask_bounded(&SlowClassifier, "x", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClassifierError::Timeout { .. })));
    }

    #[tokio::test]
    async fn ask_bounded_passes_fast_answers_through() {
        let result = ask_bounded(&SlowClassifier, "x", Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), "transaccion");
    }

    #[test]
    fn create_classifier_without_config_is_disabled() {
        let classifier = create_classifier(None).unwrap();
        assert_eq!(classifier.name(), "disabled");
    }

    #[test]
    fn create_classifier_with_config_is_http() {
        let config = ClassifierConfig {
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o-mini".into(),
        };
        let classifier = create_classifier(Some(&config)).unwrap();
        assert_eq!(classifier.name(), "http");
    }
}
