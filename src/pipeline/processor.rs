//! Message processor — drives one inbound message through the pipeline.
//!
//! Stages, in order:
//! 1. Recipient gate: the address must carry a user id
//! 2. Normalization: headers, transfer encodings, HTML
//! 3. Sender-verification divert (forwarding provider handshakes)
//! 4. Institution match: unknown senders are dropped
//! 5. Intent: promotional mail short-circuits to a promo record
//! 6. Extraction, fingerprint, record assembly
//! 7. Delivery, with a best-effort failure report when the sink refuses
//!
//! No stage aborts the invocation. Every failure mode collapses into a
//! drop, a diagnostic record, or a log line, and the caller always gets
//! an outcome.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::RecordSink;
use crate::classifier::Classifier;
use crate::config::DEFAULT_CLASSIFIER_TIMEOUT_SECS;
use crate::institutions::InstitutionRegistry;
use crate::mail::normalize;
use crate::pipeline::types::{
    InboundEmail, Intent, NormalizedEmail, ProcessOutcome, TransactionRecord,
};
use crate::pipeline::{extract, fingerprint, intent};
use crate::verification::{self, NoticeForwarder};

/// Pipeline knobs that travel with the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound for each classifier call.
    pub classifier_deadline: Duration,
    /// When set, recipients must belong to this domain.
    pub inbound_domain: Option<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            classifier_deadline: Duration::from_secs(DEFAULT_CLASSIFIER_TIMEOUT_SECS),
            inbound_domain: None,
        }
    }
}

pub struct MessageProcessor {
    registry: InstitutionRegistry,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn RecordSink>,
    forwarder: Option<Arc<dyn NoticeForwarder>>,
    config: ProcessorConfig,
}

impl MessageProcessor {
    pub fn new(
        registry: InstitutionRegistry,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn RecordSink>,
        forwarder: Option<Arc<dyn NoticeForwarder>>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            registry,
            classifier,
            sink,
            forwarder,
            config,
        }
    }

    /// Process one inbound message end to end.
    pub async fn process(&self, email: InboundEmail) -> ProcessOutcome {
        let invocation = Uuid::new_v4();
        info!(
            id = %invocation,
            from = %email.from,
            to = %email.to,
            "Processing inbound message"
        );

        let Some(user_id) = parse_recipient(&email.to, self.config.inbound_domain.as_deref())
        else {
            debug!(id = %invocation, to = %email.to, "Recipient carries no user id, dropping");
            return ProcessOutcome::Dropped;
        };

        let normalized = normalize(&email);

        if verification::is_verification_sender(&normalized.raw_from) {
            return self.divert_verification(invocation, &normalized).await;
        }

        let Some(sender) = self.registry.match_sender(&normalized.raw_from) else {
            debug!(
                id = %invocation,
                from = %normalized.raw_from,
                "Sender matches no known institution, dropping"
            );
            return ProcessOutcome::Dropped;
        };
        debug!(
            id = %invocation,
            institution = %sender.institution_id,
            marketing = sender.is_marketing,
            "Sender matched"
        );

        let received_at = Utc::now();
        let resolved = intent::classify(
            &sender,
            &normalized.subject,
            &normalized.body,
            self.classifier.as_ref(),
            self.config.classifier_deadline,
        )
        .await;
        debug!(
            id = %invocation,
            intent = ?resolved.intent,
            signal = ?resolved.signal,
            reason = %resolved.reason,
            "Intent resolved"
        );

        let email_hash = fingerprint::fingerprint(&normalized.subject, &normalized.body);

        let record = if resolved.intent == Intent::Promotional {
            TransactionRecord::promotional(&user_id, &email_hash, &sender, &normalized, received_at)
        } else {
            let tx = extract::extract(
                &normalized.subject,
                &normalized.body,
                self.classifier.as_ref(),
                self.config.classifier_deadline,
            )
            .await;
            if tx.amount > Decimal::ZERO {
                info!(
                    id = %invocation,
                    kind = tx.kind.as_str(),
                    amount = %tx.amount,
                    "Transaction extracted"
                );
                TransactionRecord::success(
                    &user_id,
                    &tx,
                    &email_hash,
                    &sender,
                    &normalized,
                    received_at,
                )
            } else {
                debug!(id = %invocation, "No amount found, assembling parse-failure record");
                TransactionRecord::parse_failure(&user_id, &sender, &normalized, received_at)
            }
        };

        self.deliver(invocation, &user_id, &normalized, record).await;
        ProcessOutcome::Accepted
    }

    /// Hand a forwarding-provider handshake to the operator endpoint.
    async fn divert_verification(
        &self,
        invocation: Uuid,
        normalized: &NormalizedEmail,
    ) -> ProcessOutcome {
        let notice = verification::extract_notice(normalized);
        info!(
            id = %invocation,
            sender = %notice.sender,
            subject = %notice.subject,
            "Sender-verification message diverted"
        );
        match &self.forwarder {
            Some(forwarder) => {
                if let Err(e) = forwarder.forward(&notice).await {
                    warn!(id = %invocation, error = %e, "Verification forward failed");
                }
            }
            None => warn!(
                id = %invocation,
                link = notice.link.as_deref().unwrap_or("none"),
                code = notice.code.as_deref().unwrap_or("none"),
                "No forward endpoint configured, verification notice logged only"
            ),
        }
        ProcessOutcome::Forwarded
    }

    /// Hand a record to the sink.
    ///
    /// A refused primary record gets one best-effort failure report so
    /// the backend can surface the outage to the user. The report's own
    /// errors are swallowed; nothing is retried.
    async fn deliver(
        &self,
        invocation: Uuid,
        user_id: &str,
        normalized: &NormalizedEmail,
        record: TransactionRecord,
    ) {
        match self.sink.deliver(&record).await {
            Ok(()) => {
                info!(id = %invocation, valid = record.valid, "Record delivered");
            }
            Err(e) => {
                error!(id = %invocation, error = %e, "Record delivery failed");
                let report = TransactionRecord::worker_error(user_id, normalized);
                if let Err(e) = self.sink.deliver(&report).await {
                    warn!(id = %invocation, error = %e, "Failure report also refused");
                }
            }
        }
    }
}

// ── Recipient parsing ───────────────────────────────────────────────

fn recipient_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^user_([A-Za-z0-9][A-Za-z0-9._-]*)@([A-Za-z0-9][A-Za-z0-9.-]*)$").unwrap()
    })
}

/// Pull the user id out of the envelope recipient.
///
/// Recipients look like `user_<id>@<domain>`. The id is opaque and kept
/// verbatim; the domain check, when configured, is case-insensitive.
pub fn parse_recipient(to: &str, required_domain: Option<&str>) -> Option<String> {
    let address = bare_recipient(to);
    let caps = recipient_re().captures(address)?;
    if let Some(required) = required_domain
        && !caps[2].eq_ignore_ascii_case(required)
    {
        return None;
    }
    Some(caps[1].to_string())
}

/// Angle-bracket aware address strip that keeps the original case, so
/// opaque user ids survive intact.
fn bare_recipient(value: &str) -> &str {
    if let (Some(start), Some(end)) = (value.rfind('<'), value.rfind('>'))
        && start < end
    {
        value[start + 1..end].trim()
    } else {
        value.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::error::{ClassifierError, DeliveryError};
    use crate::pipeline::types::{RejectReason, TransactionKind};
    use crate::verification::VerificationNotice;

    // ── Recipient parsing tests ─────────────────────────────────────

    #[test]
    fn recipient_with_user_prefix_parses() {
        assert_eq!(
            parse_recipient("user_abc123@inbound.example.com", None),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn recipient_display_name_form_parses() {
        assert_eq!(
            parse_recipient("Finmail <user_abc123@inbound.example.com>", None),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn recipient_id_case_is_preserved() {
        assert_eq!(
            parse_recipient("user_AbC9@inbound.example.com", None),
            Some("AbC9".to_string())
        );
    }

    #[test]
    fn recipient_without_prefix_is_rejected() {
        assert_eq!(parse_recipient("someone@inbound.example.com", None), None);
        assert_eq!(parse_recipient("users_abc@inbound.example.com", None), None);
        assert_eq!(parse_recipient("user_@inbound.example.com", None), None);
    }

    #[test]
    fn recipient_domain_is_enforced_when_configured() {
        assert_eq!(
            parse_recipient("user_abc@other.example.com", Some("inbound.example.com")),
            None
        );
        assert_eq!(
            parse_recipient("user_abc@INBOUND.EXAMPLE.COM", Some("inbound.example.com")),
            Some("abc".to_string())
        );
    }

    // ── Pipeline tests ──────────────────────────────────────────────

    struct StubClassifier {
        answer: &'static str,
        called: AtomicBool,
    }

    impl StubClassifier {
        fn new(answer: &'static str) -> Self {
            Self {
                answer,
                called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ClassifierError> {
            self.called.store(true, Ordering::SeqCst);
            Ok(self.answer.to_string())
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        records: Mutex<Vec<TransactionRecord>>,
        fail_first: bool,
    }

    impl CapturingSink {
        fn failing_first() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_first: true,
            }
        }

        fn records(&self) -> Vec<TransactionRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSink for CapturingSink {
        async fn deliver(&self, record: &TransactionRecord) -> Result<(), DeliveryError> {
            let mut records = self.records.lock().unwrap();
            records.push(record.clone());
            if self.fail_first && records.len() == 1 {
                return Err(DeliveryError::Rejected {
                    endpoint: "http://backend.test/ingest".into(),
                    status: 503,
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingForwarder {
        notices: Mutex<Vec<VerificationNotice>>,
    }

    #[async_trait]
    impl NoticeForwarder for CapturingForwarder {
        async fn forward(&self, notice: &VerificationNotice) -> Result<(), DeliveryError> {
            self.notices.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    fn processor(
        classifier: Arc<StubClassifier>,
        sink: Arc<CapturingSink>,
        forwarder: Option<Arc<CapturingForwarder>>,
    ) -> MessageProcessor {
        MessageProcessor::new(
            InstitutionRegistry::default_registry(),
            classifier,
            sink,
            forwarder.map(|f| f as Arc<dyn NoticeForwarder>),
            ProcessorConfig {
                classifier_deadline: Duration::from_millis(200),
                inbound_domain: Some("inbound.example.com".to_string()),
            },
        )
    }

    fn inbound(from: &str, to: &str, raw: &str) -> InboundEmail {
        InboundEmail {
            to: to.to_string(),
            from: from.to_string(),
            raw: raw.to_string(),
        }
    }

    #[tokio::test]
    async fn transfer_email_produces_success_record() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transfer_received"));
        let p = processor(classifier, sink.clone(), None);

        let raw = "Subject: Recibiste una transferencia\r\n\
                   From: Mercado Pago <info@mercadopago.com>\r\n\
                   \r\n\
                   Recibiste una transferencia de Juan Perez\r\n\
                   Monto: $1.500,50\r\n\
                   Numero de operacion: 123456789\r\n";
        let outcome = p
            .process(inbound(
                "info@mercadopago.com",
                "user_abc123@inbound.example.com",
                raw,
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Accepted);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.valid);
        assert_eq!(record.user_id, "abc123");
        assert_eq!(record.kind, Some(TransactionKind::TransferReceived));
        assert_eq!(record.amount, Some(dec!(1500.50)));
        assert_eq!(record.counterparty.as_deref(), Some("Juan Perez"));
        assert_eq!(record.reference_id.as_deref(), Some("123456789"));
        assert_eq!(record.institution.as_deref(), Some("mercadopago"));
        assert_eq!(record.email_hash.as_deref().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn unknown_sender_is_dropped_silently() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier.clone(), sink.clone(), None);

        let outcome = p
            .process(inbound(
                "spam@lottery-winners.example",
                "user_abc123@inbound.example.com",
                "Subject: You won\r\n\r\nClaim your prize",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Dropped);
        assert!(sink.records().is_empty());
        assert!(!classifier.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn recipient_without_user_id_is_dropped() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier, sink.clone(), None);

        let outcome = p
            .process(inbound(
                "info@mercadopago.com",
                "operator@inbound.example.com",
                "Subject: Recibiste dinero\r\n\r\nMonto: $100",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Dropped);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn recipient_on_foreign_domain_is_dropped() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier, sink.clone(), None);

        let outcome = p
            .process(inbound(
                "info@mercadopago.com",
                "user_abc123@elsewhere.example.com",
                "Subject: Recibiste dinero\r\n\r\nMonto: $100",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Dropped);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn marketing_sender_produces_promotional_record() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier.clone(), sink.clone(), None);

        let outcome = p
            .process(inbound(
                "promo@marketing.uala.com.ar",
                "user_abc123@inbound.example.com",
                "Subject: Novedades de tu cuenta\r\n\r\nConoce las novedades del mes",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Accepted);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].valid);
        assert_eq!(records[0].is_promotional, Some(true));
        assert_eq!(records[0].institution.as_deref(), Some("uala"));
        // Marketing domains never reach the model.
        assert!(!classifier.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn promotional_keyword_short_circuits() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier.clone(), sink.clone(), None);

        let outcome = p
            .process(inbound(
                "info@mercadopago.com",
                "user_abc123@inbound.example.com",
                "Subject: Cashback del 20% esta semana\r\n\r\nAprovecha antes del domingo",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Accepted);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].is_promotional, Some(true));
        assert!(!classifier.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn transactional_without_amount_produces_parse_failure() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transfer_received"));
        let p = processor(classifier, sink.clone(), None);

        let outcome = p
            .process(inbound(
                "info@mercadopago.com",
                "user_abc123@inbound.example.com",
                "Subject: Recibiste una transferencia\r\n\r\nEl detalle llega por separado.",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Accepted);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(!record.valid);
        assert_eq!(record.reason, Some(RejectReason::ParseFailed));
        assert!(record.body_preview.is_some());
    }

    #[tokio::test]
    async fn refused_delivery_triggers_one_failure_report() {
        let sink = Arc::new(CapturingSink::failing_first());
        let classifier = Arc::new(StubClassifier::new("transfer_received"));
        let p = processor(classifier, sink.clone(), None);

        let outcome = p
            .process(inbound(
                "info@mercadopago.com",
                "user_abc123@inbound.example.com",
                "Subject: Recibiste una transferencia\r\n\r\nMonto: $500",
            ))
            .await;

        // The invocation still completes cleanly.
        assert_eq!(outcome, ProcessOutcome::Accepted);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].valid);
        assert_eq!(records[1].reason, Some(RejectReason::WorkerError));
        assert!(!records[1].valid);
    }

    #[tokio::test]
    async fn verification_email_is_forwarded_not_ingested() {
        let sink = Arc::new(CapturingSink::default());
        let forwarder = Arc::new(CapturingForwarder::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier, sink.clone(), Some(forwarder.clone()));

        let raw = "Subject: Please verify user_abc123@inbound.example.com\r\n\
                   \r\n\
                   Confirm here: https://app.improvmx.com/verify/tok-1\r\n";
        let outcome = p
            .process(inbound(
                "ImprovMX <verification@improvmx.com>",
                "user_abc123@inbound.example.com",
                raw,
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Forwarded);
        assert!(sink.records().is_empty());
        let notices = forwarder.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices[0].link.as_deref(),
            Some("https://app.improvmx.com/verify/tok-1")
        );
        assert_eq!(
            notices[0].body,
            "Confirm here: https://app.improvmx.com/verify/tok-1"
        );
    }

    #[tokio::test]
    async fn verification_without_forwarder_still_diverts() {
        let sink = Arc::new(CapturingSink::default());
        let classifier = Arc::new(StubClassifier::new("transaccional"));
        let p = processor(classifier, sink.clone(), None);

        let outcome = p
            .process(inbound(
                "no-reply@forwardemail.net",
                "user_abc123@inbound.example.com",
                "Subject: Confirm your alias\r\n\r\nCode: 842913",
            ))
            .await;

        assert_eq!(outcome, ProcessOutcome::Forwarded);
        assert!(sink.records().is_empty());
    }
}
