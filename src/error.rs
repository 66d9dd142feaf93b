//! Error types for finmail.

use std::time::Duration;

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// External classifier errors. Every call site degrades to a
/// deterministic fallback, so none of these abort an invocation.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier is disabled: {reason}")]
    Disabled { reason: String },

    #[error("Classifier request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Classifier answered {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Invalid response from classifier: {reason}")]
    InvalidResponse { reason: String },

    #[error("Classifier call timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Outbound HTTP delivery errors (record sink and verification forwarder).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to reach {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("{endpoint} answered {status}")]
    Rejected { endpoint: String, status: u16 },
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;
