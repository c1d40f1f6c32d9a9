//! Best-effort decoding of access token claims.
//!
//! Nothing here verifies a signature. Decoded claims are for display and
//! optimistic expiry hints only; the server remains the authority.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload segment of an access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: String,
    /// Expiry, epoch seconds. Zero when absent.
    #[serde(default)]
    pub exp: i64,
    /// Issued-at, epoch seconds.
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub jti: String,
}

/// Display projection of [`Claims`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenUserInfo {
    pub id: u64,
    pub username: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_info(&self) -> TokenUserInfo {
        TokenUserInfo {
            id: self.user_id,
            username: self.username.clone(),
            role: self.role.clone(),
            exp: self.exp,
            iat: self.iat,
            jti: self.jti.clone(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        (self.exp > 0)
            .then(|| DateTime::from_timestamp(self.exp, 0))
            .flatten()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        (self.iat > 0)
            .then(|| DateTime::from_timestamp(self.iat, 0))
            .flatten()
    }

    /// Missing `exp` counts as expired.
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.exp == 0 || self.exp < now_secs
    }
}

/// Decode the payload segment. Returns `None` on a wrong segment count,
/// invalid base64url or invalid JSON.
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() || payload.is_empty() {
        return None;
    }

    // Accept standard-alphabet and padded encodings as well.
    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD.decode(normalized.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expired by its own `exp` claim. Undecodable tokens count as expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

pub fn is_expired_at(token: &str, now_secs: i64) -> bool {
    decode(token).map_or(true, |claims| claims.is_expired_at(now_secs))
}

/// Three base64url segments; the signature segment may be empty.
pub fn is_valid_format(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return false;
    }
    let is_b64url = |s: &str| {
        s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    };
    !segments[0].is_empty()
        && !segments[1].is_empty()
        && segments.iter().all(|s| is_b64url(s))
}

#[cfg(test)]
pub(crate) fn encode_for_test(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}
