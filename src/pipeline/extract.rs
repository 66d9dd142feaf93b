//! Transaction extraction from transactional notifications.
//!
//! Four independent passes over the decoded message: movement type
//! (classifier first, keyword rules as fallback), amount (localized
//! number parsing, largest candidate wins), counterparty (ordered
//! phrase patterns) and reference id. Extraction never fails — a
//! message nothing could be pulled from comes back with a zero amount
//! and the caller turns that into a parse-failure record.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::classifier::{Classifier, ask_bounded};
use crate::pipeline::types::{ExtractedTransaction, TransactionKind};

/// Currency reported when a message does not say otherwise. The
/// supported institutions all notify in pesos.
pub const DEFAULT_CURRENCY: &str = "ARS";

/// How much of the body goes into the classifier prompt.
const PREVIEW_CHARS: usize = 400;

// ── Movement type ───────────────────────────────────────────────────

/// Where a keyword rule looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Subject,
    SubjectAndBody,
}

struct KindRule {
    needle: &'static str,
    kind: TransactionKind,
    scope: Scope,
}

/// Ordered keyword rules for the movement type.
///
/// First match wins, and money-in rules sit before money-out rules so
/// a notification mentioning both directions resolves to the credit.
const KIND_RULES: &[KindRule] = &[
    // money in
    KindRule {
        needle: "recibiste una transferencia",
        kind: TransactionKind::TransferReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "transferencia recibida",
        kind: TransactionKind::TransferReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "te transfirieron",
        kind: TransactionKind::TransferReceived,
        scope: Scope::SubjectAndBody,
    },
    KindRule {
        needle: "te enviaron",
        kind: TransactionKind::TransferReceived,
        scope: Scope::SubjectAndBody,
    },
    KindRule {
        needle: "recibiste un pago",
        kind: TransactionKind::PaymentReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "pago recibido",
        kind: TransactionKind::PaymentReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "te pagaron",
        kind: TransactionKind::PaymentReceived,
        scope: Scope::SubjectAndBody,
    },
    KindRule {
        needle: "cobraste",
        kind: TransactionKind::PaymentReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "depósito acreditado",
        kind: TransactionKind::Deposit,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "deposito acreditado",
        kind: TransactionKind::Deposit,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "ingresaste dinero",
        kind: TransactionKind::Deposit,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "reintegro",
        kind: TransactionKind::RefundReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "reembolso acreditado",
        kind: TransactionKind::RefundReceived,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "te devolvimos",
        kind: TransactionKind::RefundReceived,
        scope: Scope::SubjectAndBody,
    },
    // money out
    KindRule {
        needle: "enviaste una transferencia",
        kind: TransactionKind::TransferSent,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "transferencia enviada",
        kind: TransactionKind::TransferSent,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "le enviaste",
        kind: TransactionKind::TransferSent,
        scope: Scope::SubjectAndBody,
    },
    KindRule {
        needle: "transferiste",
        kind: TransactionKind::TransferSent,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "pagaste",
        kind: TransactionKind::PaymentSent,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "pago enviado",
        kind: TransactionKind::PaymentSent,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "realizaste un pago",
        kind: TransactionKind::PaymentSent,
        scope: Scope::SubjectAndBody,
    },
    KindRule {
        needle: "compraste",
        kind: TransactionKind::PaymentSent,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "extracción",
        kind: TransactionKind::Withdrawal,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "extraccion",
        kind: TransactionKind::Withdrawal,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "retiraste",
        kind: TransactionKind::Withdrawal,
        scope: Scope::Subject,
    },
    KindRule {
        needle: "devolviste",
        kind: TransactionKind::RefundSent,
        scope: Scope::SubjectAndBody,
    },
    KindRule {
        needle: "reembolsaste",
        kind: TransactionKind::RefundSent,
        scope: Scope::Subject,
    },
];

/// Resolve the movement type from keywords alone.
pub fn keyword_kind(subject: &str, body: &str) -> TransactionKind {
    let subject = subject.to_lowercase();
    let body = body.to_lowercase();
    for rule in KIND_RULES {
        let hit = match rule.scope {
            Scope::Subject => subject.contains(rule.needle),
            Scope::SubjectAndBody => {
                subject.contains(rule.needle) || body.contains(rule.needle)
            }
        };
        if hit {
            return rule.kind;
        }
    }
    TransactionKind::Unknown
}

fn kind_prompt(subject: &str, preview: &str) -> String {
    format!(
        "Clasificá esta notificación bancaria en exactamente uno de estos tipos:\n\
         transfer_received, transfer_sent, payment_received, payment_sent, \
         withdrawal, deposit, refund_received, refund_sent.\n\
         Respondé únicamente con el tipo.\n\
         Asunto: {subject}\n\
         Texto: {preview}"
    )
}

/// Movement type via the classifier, validated against the closed set.
/// Anything else — bad token, error, timeout — falls back to keywords.
async fn detect_kind(
    subject: &str,
    body: &str,
    classifier: &dyn Classifier,
    deadline: Duration,
) -> TransactionKind {
    let preview: String = body.chars().take(PREVIEW_CHARS).collect();
    let prompt = kind_prompt(subject, &preview);
    match ask_bounded(classifier, &prompt, deadline).await {
        Ok(answer) => {
            let token = answer.trim().to_lowercase();
            let token =
                token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
            match TransactionKind::from_token(token) {
                Some(kind) => kind,
                None => {
                    debug!(answer = %answer, "classifier answer outside the closed set");
                    keyword_kind(subject, body)
                }
            }
        }
        Err(e) => {
            debug!(error = %e, "classifier unavailable for type detection");
            keyword_kind(subject, body)
        }
    }
}

// ── Amount ──────────────────────────────────────────────────────────

fn symbol_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\s*([0-9][0-9.,]*)").unwrap())
}

fn ars_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bARS\s*([0-9][0-9.,]*)").unwrap())
}

/// Parse one amount written in the Argentine convention.
///
/// A trailing comma followed by exactly two digits is the decimal
/// separator and dots are thousands separators; otherwise dots are
/// thousands separators and there is no fractional part.
pub fn parse_localized_amount(raw: &str) -> Option<Decimal> {
    let cleaned = raw.trim().trim_end_matches(['.', ',']);
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match cleaned.rfind(',') {
        Some(pos) if cleaned.len() - pos == 3 => {
            let (int_part, frac) = cleaned.split_at(pos);
            format!("{}.{}", int_part.replace('.', ""), &frac[1..])
        }
        _ => cleaned.replace('.', ""),
    };
    normalized.parse::<Decimal>().ok()
}

/// Largest amount mentioned in the text, zero when none parses.
///
/// Notifications repeat smaller numbers (fees, running balance digits,
/// installment counts), so the maximum is the best guess for the
/// principal amount. Candidates that fail to parse contribute zero.
pub fn max_amount(text: &str) -> Decimal {
    let mut max = Decimal::ZERO;
    let candidates = symbol_amount_re()
        .captures_iter(text)
        .chain(ars_amount_re().captures_iter(text));
    for caps in candidates {
        let value = caps
            .get(1)
            .and_then(|m| parse_localized_amount(m.as_str()))
            .unwrap_or(Decimal::ZERO);
        if value > max {
            max = value;
        }
    }
    max
}

// ── Counterparty ────────────────────────────────────────────────────

struct CounterpartyRule {
    /// Short label for diagnostics.
    label: &'static str,
    regex: Regex,
}

/// Ordered counterparty patterns: named fields first, directional
/// phrases next, trailing merchant phrases last.
fn counterparty_rules() -> &'static [CounterpartyRule] {
    static RULES: OnceLock<Vec<CounterpartyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            CounterpartyRule {
                label: "nombre y apellido",
                regex: Regex::new(r"(?i)nombre y apellido:\s*([^\r\n]+)").unwrap(),
            },
            CounterpartyRule {
                label: "razon social",
                regex: Regex::new(r"(?i)raz(?:ó|o)n social:\s*([^\r\n]+)").unwrap(),
            },
            CounterpartyRule {
                label: "enviaste a",
                regex: Regex::new(
                    r"(?i)enviaste\s+(?:una\s+transferencia\s+|dinero\s+|\$\s*[\d.,]+\s+)?a\s+([^\r\n.,;!]+)",
                )
                .unwrap(),
            },
            CounterpartyRule {
                label: "recibiste de",
                regex: Regex::new(
                    r"(?i)recibiste\s+(?:una\s+transferencia\s+|un\s+pago\s+|dinero\s+|\$\s*[\d.,]+\s+)?de\s+(?:\$\s*[\d.,]+\s+de\s+)?([^\r\n.,;!]+)",
                )
                .unwrap(),
            },
            CounterpartyRule {
                label: "de parte de",
                regex: Regex::new(r"(?i)de parte de\s+([^\r\n.,;!]+)").unwrap(),
            },
            CounterpartyRule {
                label: "te envio",
                regex: Regex::new(r"(?i)([^\r\n.,;!¡]+?)\s+te\s+envi(?:ó|o)\s").unwrap(),
            },
            CounterpartyRule {
                label: "pagaste en",
                regex: Regex::new(r"(?i)(?:pagaste|compra|consumo)\s+en\s+([^\r\n.,;!]+)")
                    .unwrap(),
            },
        ]
    })
}

/// First counterparty pattern whose trimmed capture is longer than one
/// character and does not open with a currency symbol or digit. Patterns
/// that match but capture junk fall through to the next one.
pub fn extract_counterparty(text: &str) -> Option<String> {
    for rule in counterparty_rules() {
        if let Some(caps) = rule.regex.captures(text)
            && let Some(capture) = caps.get(1)
        {
            let cleaned = capture
                .as_str()
                .trim()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '"', '\''])
                .trim();
            let amount_like = cleaned.starts_with(|c: char| c == '$' || c.is_ascii_digit());
            if cleaned.chars().count() > 1 && !amount_like {
                debug!(rule = rule.label, counterparty = cleaned, "counterparty matched");
                return Some(cleaned.to_string());
            }
        }
    }
    None
}

// ── Reference id ────────────────────────────────────────────────────

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:operaci(?:ó|o)n|referencia|comprobante|recibo|id)\b[^\r\n0-9]{0,12}([0-9]{5,})",
        )
        .unwrap()
    })
}

/// Operation/reference number: a known label followed by a run of at
/// least five digits.
pub fn extract_reference(text: &str) -> Option<String> {
    reference_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// ── Entry point ─────────────────────────────────────────────────────

/// Extract the transaction described by a transactional notification.
pub async fn extract(
    subject: &str,
    body: &str,
    classifier: &dyn Classifier,
    deadline: Duration,
) -> ExtractedTransaction {
    let kind = detect_kind(subject, body, classifier, deadline).await;
    let haystack = format!("{subject}\n{body}");
    ExtractedTransaction {
        kind,
        amount: max_amount(&haystack),
        currency: DEFAULT_CURRENCY.to_string(),
        counterparty: extract_counterparty(&haystack),
        reference_id: extract_reference(&haystack),
    }
}
