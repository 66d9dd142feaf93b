//! Message fingerprinting for downstream deduplication.

use sha2::{Digest, Sha256};

/// How much of the body participates in the fingerprint.
const BODY_PREFIX_CHARS: usize = 200;

/// SHA-256 over the subject and the first 200 characters of the body,
/// rendered as lowercase hex.
///
/// Two deliveries of the same notification collide here even when the
/// bodies diverge past the prefix (tracking footers and the like).
/// This is for deduplication only — record identity stays with the
/// backend.
pub fn fingerprint(subject: &str, body: &str) -> String {
    let prefix: String = body.chars().take(BODY_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(prefix.as_bytes());
    format!("{:x}", hasher.finalize())
}
