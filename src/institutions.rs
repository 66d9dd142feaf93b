//! Static registry of known financial institutions.
//!
//! Every institution lists the senders its transactional notifications
//! come from and, separately, the senders used for marketing blasts.
//! Matching walks the registry in declaration order and, within an
//! institution, checks transactional entries before marketing ones, so
//! registry order is part of the matching contract.

use serde::{Deserialize, Serialize};

// ── Types ───────────────────────────────────────────────────────────

/// Whether the institution is a bank or an app-first fintech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstitutionKind {
    Fintech,
    Bank,
}

impl InstitutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fintech => "fintech",
            Self::Bank => "bank",
        }
    }
}

/// One known institution.
///
/// Sender entries are either exact addresses (`info@uala.com.ar`) or
/// domain suffixes written with a leading `@` (`@mercadopago.com`).
/// A suffix entry also covers subdomains of the listed domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    /// Stable identifier used in outbound records.
    pub id: String,
    /// Human-readable name used in outbound records.
    pub display_name: String,
    pub kind: InstitutionKind,
    pub transactional_senders: Vec<String>,
    pub marketing_senders: Vec<String>,
}

/// Result of matching a sender against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderMatch {
    pub institution_id: String,
    pub display_name: String,
    pub kind: InstitutionKind,
    /// True when the sender matched the marketing list.
    pub is_marketing: bool,
}

// ── Registry ────────────────────────────────────────────────────────

/// Ordered list of institutions. First match wins.
#[derive(Debug, Clone)]
pub struct InstitutionRegistry {
    institutions: Vec<Institution>,
}

impl InstitutionRegistry {
    pub fn new(institutions: Vec<Institution>) -> Self {
        Self { institutions }
    }

    /// Registry of Argentine institutions this worker understands.
    pub fn default_registry() -> Self {
        Self::new(vec![
            Institution {
                id: "mercadopago".into(),
                display_name: "Mercado Pago".into(),
                kind: InstitutionKind::Fintech,
                transactional_senders: vec![
                    "@mercadopago.com".into(),
                    "@mercadopago.com.ar".into(),
                ],
                marketing_senders: vec![
                    "@news.mercadolibre.com".into(),
                    "@e.mercadolibre.com".into(),
                ],
            },
            Institution {
                id: "uala".into(),
                display_name: "Ualá".into(),
                kind: InstitutionKind::Fintech,
                transactional_senders: vec![
                    "@notificaciones.uala.com.ar".into(),
                    "info@uala.com.ar".into(),
                    "no-reply@uala.com.ar".into(),
                ],
                marketing_senders: vec![
                    "@marketing.uala.com.ar".into(),
                    "novedades@uala.com.ar".into(),
                ],
            },
            Institution {
                id: "brubank".into(),
                display_name: "Brubank".into(),
                kind: InstitutionKind::Fintech,
                transactional_senders: vec!["@brubank.com".into(), "@mail.brubank.app".into()],
                marketing_senders: vec!["@promos.brubank.app".into()],
            },
            Institution {
                id: "personalpay".into(),
                display_name: "Personal Pay".into(),
                kind: InstitutionKind::Fintech,
                transactional_senders: vec![
                    "@personalpay.com.ar".into(),
                    "no-reply@personal.com.ar".into(),
                ],
                marketing_senders: vec!["@news.personal.com.ar".into()],
            },
            Institution {
                id: "naranjax".into(),
                display_name: "Naranja X".into(),
                kind: InstitutionKind::Fintech,
                transactional_senders: vec!["@naranjax.com".into(), "avisos@naranja.com".into()],
                marketing_senders: vec!["@novedades.naranja.com".into()],
            },
            Institution {
                id: "galicia".into(),
                display_name: "Banco Galicia".into(),
                kind: InstitutionKind::Bank,
                transactional_senders: vec![
                    "@notificaciones.galicia.com.ar".into(),
                    "avisos@galicia.com.ar".into(),
                    "alertas@bancogalicia.com.ar".into(),
                ],
                marketing_senders: vec!["@marketing.galicia.com.ar".into()],
            },
            Institution {
                id: "santander".into(),
                display_name: "Banco Santander".into(),
                kind: InstitutionKind::Bank,
                transactional_senders: vec![
                    "@santander.com.ar".into(),
                    "alertas@santanderrio.com.ar".into(),
                ],
                marketing_senders: vec!["@ofertas.santanderrio.com.ar".into()],
            },
            Institution {
                id: "bbva".into(),
                display_name: "BBVA Argentina".into(),
                kind: InstitutionKind::Bank,
                transactional_senders: vec![
                    "notificaciones@bbva.com.ar".into(),
                    "@alertas.bbva.com.ar".into(),
                ],
                marketing_senders: vec!["@news.bbva.com.ar".into()],
            },
            Institution {
                id: "bna".into(),
                display_name: "Banco Nación".into(),
                kind: InstitutionKind::Bank,
                transactional_senders: vec!["@bna.com.ar".into()],
                marketing_senders: vec![],
            },
        ])
    }

    /// Match a raw `From` value against the registry.
    ///
    /// Returns the first institution whose sender lists cover the
    /// address, or `None` — callers drop unmatched messages silently.
    pub fn match_sender(&self, from: &str) -> Option<SenderMatch> {
        let address = extract_address(from);
        for institution in &self.institutions {
            let transactional = institution
                .transactional_senders
                .iter()
                .any(|entry| entry_matches(entry, &address));
            let marketing = !transactional
                && institution
                    .marketing_senders
                    .iter()
                    .any(|entry| entry_matches(entry, &address));
            if transactional || marketing {
                return Some(SenderMatch {
                    institution_id: institution.id.clone(),
                    display_name: institution.display_name.clone(),
                    kind: institution.kind,
                    is_marketing: marketing,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.institutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.institutions.is_empty()
    }
}

// ── Matching helpers ────────────────────────────────────────────────

/// Pull the bare address out of a `From` value.
///
/// Handles `Display Name <addr@host>` as well as bare addresses, and
/// folds to lowercase so matching is case-insensitive.
pub fn extract_address(from: &str) -> String {
    if let (Some(start), Some(end)) = (from.rfind('<'), from.rfind('>'))
        && start < end
    {
        return from[start + 1..end].trim().to_ascii_lowercase();
    }
    from.trim().to_ascii_lowercase()
}

/// Check one registry entry against a lowercased bare address.
///
/// - `user@example.com` → exact address match
/// - `@example.com` → suffix match on the domain part; the character
///   before the suffix must be `@` or `.` so `evil-example.com` does
///   not ride along
fn entry_matches(entry: &str, address: &str) -> bool {
    let entry = entry.to_ascii_lowercase();
    if let Some(domain) = entry.strip_prefix('@') {
        match address.strip_suffix(domain) {
            Some(prefix) => prefix.ends_with('@') || prefix.ends_with('.'),
            None => false,
        }
    } else {
        address == entry
    }
}
