//! Record delivery to the app backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::DeliveryError;
use crate::pipeline::types::TransactionRecord;

/// Header carrying the shared worker secret.
pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

/// Where assembled records go.
///
/// Production posts to the backend ingest endpoint; tests swap in a
/// capturing sink. Delivery is one-shot from the pipeline's point of
/// view — the processor logs failures and never retries.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, record: &TransactionRecord) -> Result<(), DeliveryError>;
}

/// HTTP sink authenticated with the shared worker secret.
pub struct BackendClient {
    http: reqwest::Client,
    ingest_url: String,
    worker_secret: secrecy::SecretString,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Unreachable {
                endpoint: config.ingest_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            ingest_url: config.ingest_url.clone(),
            worker_secret: config.worker_secret.clone(),
        })
    }
}

#[async_trait]
impl RecordSink for BackendClient {
    async fn deliver(&self, record: &TransactionRecord) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(&self.ingest_url)
            .header(WORKER_SECRET_HEADER, self.worker_secret.expose_secret())
            .json(record)
            .send()
            .await
            .map_err(|e| DeliveryError::Unreachable {
                endpoint: self.ingest_url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                endpoint: self.ingest_url.clone(),
                status: status.as_u16(),
            });
        }
        debug!(user = %record.user_id, valid = record.valid, "record posted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_from_config() {
        let config = BackendConfig {
            ingest_url: "http://localhost:9999/ingest".into(),
            worker_secret: secrecy::SecretString::from("s3cret"),
        };
        assert!(BackendClient::new(&config).is_ok());
    }

    #[test]
    fn secret_header_name_is_stable() {
        // The backend filters on this exact header name.
        assert_eq!(WORKER_SECRET_HEADER, "x-worker-secret");
    }
}
