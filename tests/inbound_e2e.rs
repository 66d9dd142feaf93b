//! Integration tests for the inbound webhook.
//!
//! Each test spins up an Axum server on a random port with a stub
//! classifier and a capturing sink, then exercises the real HTTP
//! contract the mail delivery provider sees.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use finmail::backend::RecordSink;
use finmail::classifier::Classifier;
use finmail::error::{ClassifierError, DeliveryError};
use finmail::institutions::InstitutionRegistry;
use finmail::pipeline::processor::{MessageProcessor, ProcessorConfig};
use finmail::pipeline::types::{TransactionKind, TransactionRecord};
use finmail::server::{ServerState, inbound_routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub classifier for integration tests (no real API calls).
struct StubClassifier;

#[async_trait]
impl Classifier for StubClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ClassifierError> {
        Err(ClassifierError::Disabled {
            reason: "stubbed out in tests".into(),
        })
    }
}

/// Sink that records everything instead of posting it.
#[derive(Default)]
struct CapturingSink {
    records: Mutex<Vec<TransactionRecord>>,
}

impl CapturingSink {
    fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for CapturingSink {
    async fn deliver(&self, record: &TransactionRecord) -> Result<(), DeliveryError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Start the webhook on a random port, return (port, sink).
async fn start_server() -> (u16, Arc<CapturingSink>) {
    let sink = Arc::new(CapturingSink::default());
    let processor = Arc::new(MessageProcessor::new(
        InstitutionRegistry::default_registry(),
        Arc::new(StubClassifier),
        Arc::clone(&sink) as Arc<dyn RecordSink>,
        None,
        ProcessorConfig {
            classifier_deadline: Duration::from_millis(100),
            inbound_domain: Some("inbound.example.com".to_string()),
        },
    ));
    let app = inbound_routes(ServerState { processor });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, sink)
}

async fn post_inbound(port: u16, body: &Value) -> (u16, Value) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{port}/inbound"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body: Value = resp.json().await.unwrap();
    (status, body)
}

// ── Health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_answers_ok() {
    timeout(TEST_TIMEOUT, async {
        let (port, _sink) = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "finmail-worker");
    })
    .await
    .expect("test timed out");
}

// ── Inbound webhook ─────────────────────────────────────────────────

#[tokio::test]
async fn transfer_email_is_accepted_and_recorded() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let raw = "Subject: Recibiste una transferencia\r\n\
                   From: Mercado Pago <info@mercadopago.com>\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Recibiste una transferencia de Juan Perez\r\n\
                   Monto: $12.500\r\n\
                   Numero de operacion: 87654321\r\n";
        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "user_abc123@inbound.example.com",
                "from": "info@mercadopago.com",
                "raw": raw,
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "accepted");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.valid);
        assert_eq!(record.user_id, "abc123");
        assert_eq!(record.kind, Some(TransactionKind::TransferReceived));
        assert_eq!(record.amount, Some(dec!(12500)));
        assert_eq!(record.currency.as_deref(), Some("ARS"));
        assert_eq!(record.counterparty.as_deref(), Some("Juan Perez"));
        assert_eq!(record.reference_id.as_deref(), Some("87654321"));
        assert_eq!(record.institution.as_deref(), Some("mercadopago"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_sender_answers_dropped() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "user_abc123@inbound.example.com",
                "from": "winner@lottery.example",
                "raw": "Subject: You won\r\n\r\nClaim your prize now",
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "dropped");
        assert!(sink.records().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn recipient_without_user_id_answers_dropped() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "billing@inbound.example.com",
                "from": "info@mercadopago.com",
                "raw": "Subject: Recibiste dinero\r\n\r\nMonto: $100",
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "dropped");
        assert!(sink.records().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn marketing_email_is_recorded_as_promotional() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "user_abc123@inbound.example.com",
                "from": "promo@marketing.uala.com.ar",
                "raw": "Subject: Novedades del mes\r\n\r\nMira lo nuevo en la app",
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "accepted");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].valid);
        assert_eq!(records[0].is_promotional, Some(true));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn verification_email_answers_forwarded() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "user_abc123@inbound.example.com",
                "from": "verification@improvmx.com",
                "raw": "Subject: Verify your alias\r\n\r\n\
                        Confirm at https://app.improvmx.com/verify/tok-9",
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "forwarded");
        assert!(sink.records().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn base64_body_is_decoded_before_extraction() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        // "Te enviaron $2.500 desde tu cuenta" in base64.
        let raw = "Subject: Recibiste dinero\r\n\
                   Content-Transfer-Encoding: base64\r\n\
                   \r\n\
                   VGUgZW52aWFyb24gJDIuNTAwIGRlc2RlIHR1IGN1ZW50YQ==\r\n";
        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "user_abc123@inbound.example.com",
                "from": "info@mercadopago.com",
                "raw": raw,
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "accepted");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].valid);
        assert_eq!(records[0].amount, Some(dec!(2500)));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transactional_email_without_amount_reports_parse_failure() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let (status, body) = post_inbound(
            port,
            &json!({
                "to": "user_abc123@inbound.example.com",
                "from": "info@mercadopago.com",
                "raw": "Subject: Recibiste una transferencia\r\n\r\n\
                        El detalle de la operacion llega en otro correo.",
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "accepted");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].valid);
        assert!(records[0].body_preview.is_some());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_payload_is_a_client_error() {
    timeout(TEST_TIMEOUT, async {
        let (port, sink) = start_server().await;

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://127.0.0.1:{port}/inbound"))
            .json(&json!({ "unexpected": true }))
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_client_error());
        assert!(sink.records().is_empty());
    })
    .await
    .expect("test timed out");
}
