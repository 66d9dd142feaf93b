//! Message normalizer — raw RFC 822 text to subject plus plain body.
//!
//! Institutions send wildly inconsistent mail: single-part plain text,
//! multipart/alternative with an HTML twin, quoted-printable or base64
//! bodies, RFC 2047 subjects. The normalizer flattens all of that into
//! one [`NormalizedEmail`] and never fails — content that cannot be
//! decoded is carried through as-is so later stages still get their
//! best partial view of the message.

use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::pipeline::types::{InboundEmail, NormalizedEmail};

// ── Entry point ─────────────────────────────────────────────────────

/// Decode one inbound message.
pub fn normalize(inbound: &InboundEmail) -> NormalizedEmail {
    let raw = inbound.raw.as_str();
    let (_, body_region) = split_headers_body(raw);

    let subject = header_value(raw, "Subject")
        .map(|value| decode_rfc2047(value).trim().to_string())
        .unwrap_or_default();

    // Boundary values are case-sensitive, so the raw header value is
    // kept around next to its lowercased copy.
    let content_type = header_value(raw, "Content-Type").unwrap_or("");
    let content_type_lower = content_type.to_ascii_lowercase();
    let transfer_encoding = header_value(raw, "Content-Transfer-Encoding")
        .unwrap_or("")
        .to_ascii_lowercase();

    // Part selection happens first; the top-level transfer encoding is
    // then applied to whichever text was selected.
    let mut body = body_region.to_string();
    let mut is_html = content_type_lower.contains("text/html");
    if content_type_lower.contains("multipart")
        && let Some(boundary) = boundary_param(content_type)
        && let Some((part_body, part_is_html)) = select_part(body_region, &boundary)
    {
        body = part_body;
        is_html = part_is_html;
    }

    if transfer_encoding.contains("quoted-printable") {
        body = decode_quoted_printable(&body);
    } else if transfer_encoding.contains("base64")
        && let Some(decoded) = decode_base64_text(&body)
    {
        body = decoded;
    }

    if is_html {
        body = strip_html(&body);
    }

    NormalizedEmail {
        subject,
        body: body.trim().to_string(),
        raw_from: inbound.from.clone(),
        raw_to: inbound.to.clone(),
    }
}

// ── Header scanning ─────────────────────────────────────────────────

/// Split at the first blank line, CRLF- or LF-delimited.
///
/// Messages without a blank line come back with empty headers and the
/// whole payload as body.
fn split_headers_body(raw: &str) -> (&str, &str) {
    let crlf = raw.find("\r\n\r\n").map(|idx| (idx, 4));
    let lf = raw.find("\n\n").map(|idx| (idx, 2));
    let first = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match first {
        Some((idx, sep)) => (&raw[..idx], &raw[idx + sep..]),
        None => ("", raw),
    }
}

/// Scan header lines for `Name:` and return the rest of that line.
///
/// Values are single-line on purpose: continuation lines are not
/// joined. Scanning stops at the first blank line; when the message
/// has none, every line is scanned.
pub fn header_value<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    for line in message.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some(colon) = line.find(':')
            && line[..colon].trim().eq_ignore_ascii_case(name)
        {
            return Some(line[colon + 1..].trim());
        }
    }
    None
}

// ── Multipart handling ──────────────────────────────────────────────

/// Pull the boundary parameter out of a Content-Type value.
fn boundary_param(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let idx = lower.find("boundary=")?;
    let rest = content_type[idx + "boundary=".len()..].trim_start();
    let boundary = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next().unwrap_or("")
    } else {
        rest.split([';', ' ', '\t']).next().unwrap_or("")
    };
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

/// Split a multipart body into sections and pick the best text part.
///
/// A `text/plain` part wins over `text/html`; an HTML part is flagged
/// so the caller strips it after transfer decoding. Parts without a
/// Content-Type count as plain text.
fn select_part(body: &str, boundary: &str) -> Option<(String, bool)> {
    let marker = format!("--{boundary}");
    let terminator = format!("--{boundary}--");

    let mut sections: Vec<String> = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in body.lines() {
        let trimmed = line.trim_end();
        if trimmed == terminator {
            if let Some(section) = current.take() {
                sections.push(section.join("\n"));
            }
            break;
        }
        if trimmed == marker {
            if let Some(section) = current.take() {
                sections.push(section.join("\n"));
            }
            current = Some(Vec::new());
            continue;
        }
        if let Some(section) = current.as_mut() {
            section.push(line);
        }
    }
    if let Some(section) = current.take() {
        sections.push(section.join("\n"));
    }

    let mut html: Option<String> = None;
    for section in &sections {
        let (_, part_body) = split_headers_body(section);
        let part_type = header_value(section, "Content-Type")
            .unwrap_or("text/plain")
            .to_ascii_lowercase();
        if part_type.contains("text/plain") {
            return Some((part_body.to_string(), false));
        }
        if html.is_none() && part_type.contains("text/html") {
            html = Some(part_body.to_string());
        }
    }
    html.map(|part| (part, true))
}

// ── Transfer encodings ──────────────────────────────────────────────

/// Decode quoted-printable content.
///
/// Soft line breaks are removed first, then `=XX` escapes. Escapes
/// that do not parse stay in the text verbatim, and the result is
/// rebuilt lossily so one bad byte cannot discard the body.
fn decode_quoted_printable(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') {
            i += 3;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }
        match (bytes.get(i + 1), bytes.get(i + 2)) {
            (Some(&hi), Some(&lo)) => match hex_pair(hi, lo) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Decode a base64 body. Whitespace is tolerated anywhere; input that
/// is not valid base64 or not valid UTF-8 is left untouched.
fn decode_base64_text(input: &str) -> Option<String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

// ── Subject decoding ────────────────────────────────────────────────

fn encoded_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"=\?[^?]+\?([BbQq])\?([^?]*)\?=").unwrap())
}

/// Decode RFC 2047 encoded words in a header value.
///
/// Charset declarations are ignored and payloads are read as UTF-8;
/// words that fail to decode are kept as-is.
fn decode_rfc2047(value: &str) -> String {
    encoded_word_re()
        .replace_all(value, |caps: &regex::Captures| {
            let payload = &caps[2];
            let decoded = if caps[1].eq_ignore_ascii_case("B") {
                STANDARD
                    .decode(payload.as_bytes())
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            } else {
                Some(decode_quoted_printable(&payload.replace('_', " ")))
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// ── HTML stripping ──────────────────────────────────────────────────

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

/// Flatten HTML to readable text.
///
/// Script and style blocks are removed wholesale, remaining tags turn
/// into spaces, the common entities are decoded and whitespace is
/// collapsed to single spaces.
pub fn strip_html(html: &str) -> String {
    let no_blocks = block_re().replace_all(html, " ");
    let no_tags = tag_re().replace_all(&no_blocks, " ");
    let text = no_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
