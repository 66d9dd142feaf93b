//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::institutions::SenderMatch;

/// How much of the body travels on diagnostic records.
const PREVIEW_CHARS: usize = 200;

// ── Inbound message ─────────────────────────────────────────────────

/// Raw inbound message as posted by the delivery trigger.
///
/// `raw` is the unparsed RFC 822 payload: header lines, a blank line,
/// then the body in whatever encoding the institution used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Envelope recipient — carries the user routing id.
    pub to: String,
    /// Envelope sender.
    pub from: String,
    /// Full raw message.
    pub raw: String,
}

/// Decoded view of an inbound message.
///
/// Computed once per invocation by the normalizer and never mutated
/// afterwards — every later stage reads the same subject and body.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEmail {
    /// Decoded subject line, empty when the header is missing.
    pub subject: String,
    /// Plain-text body after part selection, decoding and tag stripping.
    pub body: String,
    /// Sender exactly as supplied by the trigger.
    pub raw_from: String,
    /// Recipient exactly as supplied by the trigger.
    pub raw_to: String,
}

impl NormalizedEmail {
    /// First `PREVIEW_CHARS` characters of the body.
    pub fn body_preview(&self) -> String {
        self.body.chars().take(PREVIEW_CHARS).collect()
    }
}

// ── Intent ──────────────────────────────────────────────────────────

/// Transactional vs promotional intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Transactional,
    Promotional,
}

/// Which tier of the intent pipeline produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSignal {
    /// A keyword list matched.
    Keyword,
    /// The sender sits on an institution's marketing list.
    Domain,
    /// The external classifier answered.
    Model,
    /// Classifier unavailable — deterministic default.
    Fallback,
}

/// Outcome of intent classification.
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub signal: IntentSignal,
    /// Free-text diagnostic, e.g. which keyword fired.
    pub reason: String,
}

// ── Transaction kind ────────────────────────────────────────────────

/// Closed set of movement types a notification can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TransferReceived,
    TransferSent,
    PaymentReceived,
    PaymentSent,
    Withdrawal,
    Deposit,
    RefundReceived,
    RefundSent,
    /// No rule and no classifier answer applied.
    Unknown,
}

impl TransactionKind {
    /// Wire token for the outbound record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransferReceived => "transfer_received",
            Self::TransferSent => "transfer_sent",
            Self::PaymentReceived => "payment_received",
            Self::PaymentSent => "payment_sent",
            Self::Withdrawal => "withdrawal",
            Self::Deposit => "deposit",
            Self::RefundReceived => "refund_received",
            Self::RefundSent => "refund_sent",
            Self::Unknown => "unknown",
        }
    }

    /// Parse an exact wire token. `unknown` is not accepted — it is a
    /// pipeline state, not something a classifier may claim.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "transfer_received" => Some(Self::TransferReceived),
            "transfer_sent" => Some(Self::TransferSent),
            "payment_received" => Some(Self::PaymentReceived),
            "payment_sent" => Some(Self::PaymentSent),
            "withdrawal" => Some(Self::Withdrawal),
            "deposit" => Some(Self::Deposit),
            "refund_received" => Some(Self::RefundReceived),
            "refund_sent" => Some(Self::RefundSent),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

// ── Extraction result ───────────────────────────────────────────────

/// Fields pulled out of a transactional notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTransaction {
    pub kind: TransactionKind,
    /// Largest amount found in the message, zero when none parsed.
    pub amount: Decimal,
    pub currency: String,
    pub counterparty: Option<String>,
    pub reference_id: Option<String>,
}

// ── Outbound record ─────────────────────────────────────────────────

/// Reason code on a failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Accepted by the backend schema; this worker drops unknown
    /// senders silently instead of reporting them.
    NotFromKnownInstitution,
    ParseFailed,
    WorkerError,
}

/// Record posted to the app backend — one per accepted message.
///
/// Success records carry the transaction fields; promotional and
/// failure records carry markers and diagnostics instead. Everything
/// optional is omitted from the JSON when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub user_id: String,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_promotional: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransactionKind>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_hash: Option<String>,
    /// Spending category — left for downstream enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_type: Option<String>,
    pub subject: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
}

impl TransactionRecord {
    /// Record for a fully extracted transaction.
    pub fn success(
        user_id: &str,
        tx: &ExtractedTransaction,
        email_hash: &str,
        sender: &SenderMatch,
        normalized: &NormalizedEmail,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            valid: true,
            is_promotional: None,
            kind: Some(tx.kind),
            amount: Some(tx.amount),
            currency: Some(tx.currency.clone()),
            counterparty: tx.counterparty.clone(),
            description: Some(normalized.subject.clone()),
            reference_id: tx.reference_id.clone(),
            email_hash: Some(email_hash.to_string()),
            category: None,
            institution: Some(sender.institution_id.clone()),
            institution_name: Some(sender.display_name.clone()),
            institution_type: Some(sender.kind.as_str().to_string()),
            subject: normalized.subject.clone(),
            from: normalized.raw_from.clone(),
            received_at: Some(received_at),
            reason: None,
            body_preview: None,
        }
    }

    /// Record for a message classified as promotional — reported so the
    /// backend can count it, but never as a transaction.
    pub fn promotional(
        user_id: &str,
        email_hash: &str,
        sender: &SenderMatch,
        normalized: &NormalizedEmail,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            valid: false,
            is_promotional: Some(true),
            kind: None,
            amount: None,
            currency: None,
            counterparty: None,
            description: None,
            reference_id: None,
            email_hash: Some(email_hash.to_string()),
            category: None,
            institution: Some(sender.institution_id.clone()),
            institution_name: Some(sender.display_name.clone()),
            institution_type: Some(sender.kind.as_str().to_string()),
            subject: normalized.subject.clone(),
            from: normalized.raw_from.clone(),
            received_at: Some(received_at),
            reason: None,
            body_preview: None,
        }
    }

    /// Failure record for a transactional message nothing useful could
    /// be extracted from. Carries a body preview for manual review.
    pub fn parse_failure(
        user_id: &str,
        sender: &SenderMatch,
        normalized: &NormalizedEmail,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            valid: false,
            is_promotional: None,
            kind: None,
            amount: None,
            currency: None,
            counterparty: None,
            description: None,
            reference_id: None,
            email_hash: None,
            category: None,
            institution: Some(sender.institution_id.clone()),
            institution_name: Some(sender.display_name.clone()),
            institution_type: Some(sender.kind.as_str().to_string()),
            subject: normalized.subject.clone(),
            from: normalized.raw_from.clone(),
            received_at: Some(received_at),
            reason: Some(RejectReason::ParseFailed),
            body_preview: Some(normalized.body_preview()),
        }
    }

    /// Failure record sent on a best-effort basis after an internal
    /// error, typically when the primary delivery was refused.
    pub fn worker_error(user_id: &str, normalized: &NormalizedEmail) -> Self {
        Self {
            user_id: user_id.to_string(),
            valid: false,
            is_promotional: None,
            kind: None,
            amount: None,
            currency: None,
            counterparty: None,
            description: None,
            reference_id: None,
            email_hash: None,
            category: None,
            institution: None,
            institution_name: None,
            institution_type: None,
            subject: normalized.subject.clone(),
            from: normalized.raw_from.clone(),
            received_at: None,
            reason: Some(RejectReason::WorkerError),
            body_preview: Some(normalized.body_preview()),
        }
    }
}

// ── Invocation outcome ──────────────────────────────────────────────

/// Terminal state of one inbound invocation.
///
/// The HTTP trigger reports this back to the delivery provider; it is
/// informational only and every outcome answers 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A record was assembled and handed to the sink.
    Accepted,
    /// Dropped without a record (bad recipient or unknown sender).
    Dropped,
    /// Diverted to the sender-verification forwarder.
    Forwarded,
}

impl ProcessOutcome {
    /// Short label for logging and the trigger response.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Dropped => "dropped",
            Self::Forwarded => "forwarded",
        }
    }
}
