//! Sender-verification handling.
//!
//! Mail-forwarding providers confirm a new forwarding address by
//! sending it a one-time message with a confirmation link or numeric
//! code. Those messages must reach the operator instead of the
//! transaction pipeline, so they are detected up front and diverted.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DeliveryError;
use crate::pipeline::types::NormalizedEmail;

/// Addresses the forwarding providers verify from.
const VERIFICATION_SENDERS: &[&str] = &[
    "verification@improvmx.com",
    "no-reply@improvmx.com",
    "postmaster@improvmx.com",
    "no-reply@forwardemail.net",
    "support@forwardemail.net",
];

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>()]+"#).unwrap())
}

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9]{6,8})\b").unwrap())
}

/// Whether the message comes from a forwarding provider's
/// verification address. Matches on the bare address, so display
/// names do not hide the sender.
pub fn is_verification_sender(from: &str) -> bool {
    let address = bare_address(from).to_lowercase();
    VERIFICATION_SENDERS.iter().any(|s| *s == address)
}

fn bare_address(value: &str) -> &str {
    if let (Some(start), Some(end)) = (value.rfind('<'), value.rfind('>'))
        && start < end
    {
        value[start + 1..end].trim()
    } else {
        value.trim()
    }
}

/// What gets forwarded to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationNotice {
    pub sender: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Full decoded body of the provider's message.
    pub body: String,
}

/// Pull the confirmation link and code out of a verification message.
///
/// Links mentioning verification terms win over whatever tracking
/// link happens to appear first. Codes are 6 to 8 digit runs, which
/// is what both providers send.
pub fn extract_notice(normalized: &NormalizedEmail) -> VerificationNotice {
    let mut first_link = None;
    let mut keyword_link = None;
    for m in link_re().find_iter(&normalized.body) {
        let url = m.as_str().trim_end_matches(['.', ',', ';']);
        if first_link.is_none() {
            first_link = Some(url.to_string());
        }
        let lower = url.to_lowercase();
        if keyword_link.is_none()
            && (lower.contains("verif") || lower.contains("confirm") || lower.contains("activat"))
        {
            keyword_link = Some(url.to_string());
        }
    }

    let code = code_re()
        .captures(&normalized.subject)
        .or_else(|| code_re().captures(&normalized.body))
        .map(|caps| caps[1].to_string());

    VerificationNotice {
        sender: bare_address(&normalized.raw_from).to_lowercase(),
        subject: normalized.subject.clone(),
        link: keyword_link.or(first_link),
        code,
        body: normalized.body.clone(),
    }
}

/// Delivers diverted verification notices to the operator.
#[async_trait]
pub trait NoticeForwarder: Send + Sync {
    async fn forward(&self, notice: &VerificationNotice) -> Result<(), DeliveryError>;
}

/// Posts notices as JSON to a configured webhook.
pub struct WebhookForwarder {
    http: reqwest::Client,
    endpoint: String,
}

impl WebhookForwarder {
    pub fn new(endpoint: String) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Unreachable {
                endpoint: endpoint.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl NoticeForwarder for WebhookForwarder {
    async fn forward(&self, notice: &VerificationNotice) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(notice)
            .send()
            .await
            .map_err(|e| DeliveryError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        info!(sender = %notice.sender, "verification notice forwarded");
        Ok(())
    }
}
