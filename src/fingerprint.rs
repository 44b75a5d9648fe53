//! Local, unverified identity markers derived from a token.
//!
//! Nothing here checks a signature. These helpers exist to catch a token
//! that was filed under the wrong role and to put something readable in the
//! logs; trust comes only from the identity service's `whoAmI` answer.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde_json::Value as JsonValue;

use crate::types::{AccessToken, UserProfile};

pub const DEFAULT_FINGERPRINT_LEN: usize = 10;

/// Claim names consulted for the subject, highest priority first.
const SUBJECT_CLAIMS: [&str; 3] = ["sub", "user_id", "id"];

/// Subject decoded from a token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Known(String),
    /// Not a three-segment token, or no subject claim present.
    Unknown,
    /// Three segments, but the payload is not base64 JSON.
    DecodeError,
}

impl Subject {
    #[must_use]
    pub fn as_known(&self) -> Option<&str> {
        match self {
            Self::Known(s) => Some(s),
            Self::Unknown | Self::DecodeError => None,
        }
    }

    /// Whether a known subject names this profile, by id or by email.
    /// Unknown and undecodable subjects never mismatch.
    #[must_use]
    pub fn matches(&self, profile: &UserProfile) -> bool {
        match self {
            Self::Known(s) => {
                s == profile.id.as_str() || profile.email.as_deref() == Some(s.as_str())
            }
            Self::Unknown | Self::DecodeError => true,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(s) => f.write_str(s),
            Self::Unknown => f.write_str("unknown"),
            Self::DecodeError => f.write_str("decode-error"),
        }
    }
}

/// Last `len` characters of the token, prefixed with `...`.
#[must_use]
pub fn short_fingerprint(token: &str, len: usize) -> String {
    let count = token.chars().count();
    let tail: String = token.chars().skip(count.saturating_sub(len)).collect();
    format!("...{tail}")
}

/// Decode the subject claim from a `header.payload.signature` token.
///
/// The payload may use the URL-safe or the standard base64 alphabet, with
/// or without padding.
///
/// Never fails: structural problems map to [`Subject::Unknown`], payload
/// decoding problems to [`Subject::DecodeError`].
#[must_use]
pub fn decode_subject(token: &str) -> Subject {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Subject::Unknown;
    }

    let payload = parts[1].trim_end_matches('=');
    let Ok(bytes) = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
    else {
        return Subject::DecodeError;
    };
    let Ok(payload) = serde_json::from_slice::<JsonValue>(&bytes) else {
        return Subject::DecodeError;
    };

    SUBJECT_CLAIMS
        .iter()
        .filter_map(|claim| payload.get(claim))
        .find_map(|value| match value {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .map_or(Subject::Unknown, Subject::Known)
}

/// Which pair of identity markers disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchSource {
    /// Subject decoded from the token vs server-confirmed profile.
    TokenSubject,
    /// Profile cached in the session record vs server-confirmed profile.
    CachedProfile,
}

/// Diagnostic finding: a stored identity disagrees with the confirmed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMismatch {
    pub source: MismatchSource,
    pub expected: String,
    pub confirmed: String,
    pub fingerprint: String,
}

impl std::fmt::Display for IdentityMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.source {
            MismatchSource::TokenSubject => "token subject",
            MismatchSource::CachedProfile => "cached profile",
        };
        write!(
            f,
            "{what} {} but identity service confirmed {} (token {})",
            self.expected, self.confirmed, self.fingerprint
        )
    }
}

/// Cross-check a token and its cached profile against the profile the
/// identity service just confirmed.
#[must_use]
pub fn check_identity(
    token: &AccessToken,
    cached: &UserProfile,
    confirmed: &UserProfile,
    fingerprint_len: usize,
) -> Vec<IdentityMismatch> {
    let mut findings = Vec::new();
    let fingerprint = token.fingerprint(fingerprint_len);

    let subject = decode_subject(token.as_str());
    if !subject.matches(confirmed) {
        findings.push(IdentityMismatch {
            source: MismatchSource::TokenSubject,
            expected: subject.to_string(),
            confirmed: confirmed.id.to_string(),
            fingerprint: fingerprint.clone(),
        });
    }

    if cached.id != confirmed.id {
        findings.push(IdentityMismatch {
            source: MismatchSource::CachedProfile,
            expected: cached.id.to_string(),
            confirmed: confirmed.id.to_string(),
            fingerprint,
        });
    }

    findings
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}
