//! Intent classification — transactional vs promotional.
//!
//! Four ordered tiers, cheapest first: promotional keywords, the
//! sender's marketing list, transactional keywords, then the external
//! classifier. When every tier is silent the message is treated as
//! transactional, so a real movement is never lost to a weak signal;
//! the worst case is a promotional record the extractor later rejects.

use std::time::Duration;

use tracing::debug;

use crate::classifier::{Classifier, ask_bounded};
use crate::institutions::SenderMatch;
use crate::pipeline::types::{Intent, IntentResult, IntentSignal};

/// How much of the body participates in keyword scans and the prompt.
const PREVIEW_CHARS: usize = 400;

/// Phrases that mark a message as promotional.
///
/// Scanned in declaration order over the lowercased subject plus body
/// preview; the first hit is reported in the diagnostic reason.
pub const PROMOTIONAL_KEYWORDS: &[&str] = &[
    "cashback",
    "descuento",
    "promoción",
    "promocion",
    "cuotas sin interés",
    "cuotas sin interes",
    "beneficio",
    "sorteo",
    "oferta",
    "imperdible",
    "exclusivo para vos",
    "suscribite",
    "newsletter",
    "desuscribirte",
    "unsubscribe",
];

/// Phrases that mark a message as transactional.
pub const TRANSACTIONAL_KEYWORDS: &[&str] = &[
    "transferencia",
    "recibiste",
    "te enviaron",
    "enviaste",
    "pagaste",
    "cobraste",
    "pago",
    "compra",
    "consumo",
    "extracción",
    "extraccion",
    "depósito",
    "deposito",
    "acredit",
    "débito",
    "debito",
    "saldo",
    "comprobante",
    "movimiento",
    "reembolso",
    "reintegro",
    "retiraste",
];

/// Classify one message.
///
/// Never fails: classifier errors and timeouts collapse into the
/// transactional fallback tier.
pub async fn classify(
    sender: &SenderMatch,
    subject: &str,
    body: &str,
    classifier: &dyn Classifier,
    deadline: Duration,
) -> IntentResult {
    let preview: String = body.chars().take(PREVIEW_CHARS).collect();
    let haystack = format!("{subject}\n{preview}").to_lowercase();

    if let Some(keyword) = find_keyword(&haystack, PROMOTIONAL_KEYWORDS) {
        debug!(keyword, "promotional keyword matched");
        return IntentResult {
            intent: Intent::Promotional,
            signal: IntentSignal::Keyword,
            reason: format!("matched promotional keyword {keyword:?}"),
        };
    }

    if sender.is_marketing {
        debug!(institution = %sender.institution_id, "marketing sender");
        return IntentResult {
            intent: Intent::Promotional,
            signal: IntentSignal::Domain,
            reason: format!("sender is on the {} marketing list", sender.display_name),
        };
    }

    if let Some(keyword) = find_keyword(&haystack, TRANSACTIONAL_KEYWORDS) {
        debug!(keyword, "transactional keyword matched");
        return IntentResult {
            intent: Intent::Transactional,
            signal: IntentSignal::Keyword,
            reason: format!("matched transactional keyword {keyword:?}"),
        };
    }

    let prompt = intent_prompt(&sender.display_name, subject, &preview);
    match ask_bounded(classifier, &prompt, deadline).await {
        Ok(answer) => {
            let folded = fold_accents(&answer.to_lowercase());
            let intent = if folded.contains("transaccion") {
                Intent::Transactional
            } else {
                Intent::Promotional
            };
            IntentResult {
                intent,
                signal: IntentSignal::Model,
                reason: format!("classifier answered {answer:?}"),
            }
        }
        Err(e) => {
            debug!(error = %e, "classifier unavailable, defaulting to transactional");
            IntentResult {
                intent: Intent::Transactional,
                signal: IntentSignal::Fallback,
                reason: format!("classifier unavailable ({e}), defaulting to transactional"),
            }
        }
    }
}

/// First keyword present in the haystack, in declaration order.
fn find_keyword<'a>(haystack: &str, keywords: &'a [&'a str]) -> Option<&'a str> {
    keywords.iter().copied().find(|kw| haystack.contains(kw))
}

/// Fold the accented Spanish vowels so token checks survive both
/// spellings in classifier answers.
fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            _ => c,
        })
        .collect()
}

fn intent_prompt(institution: &str, subject: &str, preview: &str) -> String {
    format!(
        "¿Este mail de {institution} informa una transacción concreta o es publicidad?\n\
         Respondé con una sola palabra: \"transaccion\" o \"promocion\".\n\
         Asunto: {subject}\n\
         Texto: {preview}"
    )
}
