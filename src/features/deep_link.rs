//! Deep-link / QR payload parsing.
//!
//! Canonical encoding: `scheme://<type>|<aux>|<aux>...`, or the same payload
//! without a scheme as printed inside a QR code. The type token is always the
//! first segment once the scheme is gone. Only URL-form links get their query
//! and fragment dropped and percent escapes decoded; a bare payload is split
//! as-is. Links that carry a host segment
//! before the type (`scheme://host|covid|LOT42`) are rejected, since the two
//! layouts cannot be told apart by shape alone.

use crate::features::selection::TestSelection;
use crate::features::test_type::TestType;
use thiserror::Error;

pub const DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("link needs a test type and at least one more field (found {segments} segment(s))")]
    Malformed { segments: usize },
    #[error("unknown test type `{0}`")]
    UnknownTestType(String),
    #[error("unexpected link scheme `{found}` (expected `{expected}`)")]
    UnexpectedScheme { expected: String, found: String },
}

impl ParseError {
    /// Short code for the host UI.
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::Malformed { .. } => "link_malformed",
            ParseError::UnknownTestType(_) => "link_unknown_test_type",
            ParseError::UnexpectedScheme { .. } => "link_unexpected_scheme",
        }
    }
}

/// Parser bound to the app's own URL scheme.
#[derive(Debug, Clone, Default)]
pub struct LinkParser {
    scheme: Option<String>,
}

impl LinkParser {
    /// `expected_scheme` is compared case-insensitively. Links without any
    /// scheme (raw QR payloads) are always accepted.
    pub fn new(expected_scheme: Option<&str>) -> Self {
        Self {
            scheme: expected_scheme
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn parse(&self, raw_link: &str) -> Result<TestSelection, ParseError> {
        let (scheme, rest) = split_scheme(raw_link.trim_start());
        if let (Some(expected), Some(found)) = (&self.scheme, scheme) {
            if !found.eq_ignore_ascii_case(expected) {
                tracing::debug!(expected = %expected, found, "rejecting link with foreign scheme");
                return Err(ParseError::UnexpectedScheme {
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
        }
        parse_payload(rest, scheme.is_some())
    }
}

/// Parse any link, whatever its scheme.
#[cfg(test)]
pub fn parse(raw_link: &str) -> Result<TestSelection, ParseError> {
    LinkParser::default().parse(raw_link)
}

fn parse_payload(rest: &str, is_url: bool) -> Result<TestSelection, ParseError> {
    let decoded = if is_url {
        percent_decode(strip_query_and_fragment(rest).trim_start_matches('/'))
    } else {
        rest.to_string()
    };

    let segments: Vec<&str> = decoded
        .split(DELIMITER)
        .filter(|s| !s.is_empty())
        .collect();
    tracing::trace!(?segments, "link segments");

    if segments.len() < 2 {
        return Err(ParseError::Malformed {
            segments: segments.len(),
        });
    }

    let token = segments[0];
    let test_type =
        TestType::from_token(token).ok_or_else(|| ParseError::UnknownTestType(token.to_string()))?;
    let auxiliary_fields = segments[1..].iter().map(|s| s.to_string()).collect();

    Ok(TestSelection::new(test_type, auxiliary_fields))
}

/// Splits `scheme://rest`. A scheme is only recognised when it is made of
/// RFC 3986 scheme characters and followed by `://`.
fn split_scheme(raw: &str) -> (Option<&str>, &str) {
    if let Some(idx) = raw.find("://") {
        let candidate = &raw[..idx];
        let valid = candidate
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            return (Some(candidate), &raw[idx + 3..]);
        }
    }
    (None, raw)
}

fn strip_query_and_fragment(s: &str) -> &str {
    match s.find(['?', '#']) {
        Some(idx) => &s[..idx],
        None => s,
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    // Escapes that do not form valid UTF-8 are replaced rather than rejected.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
