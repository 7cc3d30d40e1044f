// SPDX-License-Identifier: EUPL-1.2

//! Shared-secret check for the scan trigger endpoints.
//!
//! Callers present the secret either as
//! ```text
//! X-Scan-Secret: <secret>
//! ```
//! or as
//! ```text
//! Authorization: Bearer <secret>
//! ```
//! Both sides are hashed before comparison so the check does not exit early
//! on the first differing byte of the raw secret.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};

use crate::error::SentinelError;

pub const SECRET_HEADER: &str = "x-scan-secret";

/// Extract the presented secret, preferring `X-Scan-Secret`.
pub fn presented_secret(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn digests_match(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Verify the request against the configured secret.
///
/// - no secret configured → [`SentinelError::Unconfigured`] (503)
/// - missing or wrong secret → [`SentinelError::Unauthorized`] (401)
pub fn verify_scan_secret(
    configured: Option<&str>,
    headers: &HeaderMap,
) -> Result<(), SentinelError> {
    let Some(expected) = configured else {
        return Err(SentinelError::Unconfigured("SCAN_SECRET is not configured".into()));
    };
    match presented_secret(headers) {
        Some(given) if digests_match(given, expected) => Ok(()),
        _ => {
            tracing::warn!("Rejected scan trigger with missing or invalid secret");
            Err(SentinelError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn accepts_either_header() {
        let direct = headers(&[("x-scan-secret", "s3cret")]);
        assert!(verify_scan_secret(Some("s3cret"), &direct).is_ok());
        let bearer = headers(&[("authorization", "Bearer s3cret")]);
        assert!(verify_scan_secret(Some("s3cret"), &bearer).is_ok());
    }

    #[test]
    fn rejects_wrong_or_missing_secret() {
        assert!(matches!(
            verify_scan_secret(Some("s3cret"), &headers(&[("x-scan-secret", "s3cre")])),
            Err(SentinelError::Unauthorized)
        ));
        assert!(matches!(
            verify_scan_secret(Some("s3cret"), &headers(&[("authorization", "Basic s3cret")])),
            Err(SentinelError::Unauthorized)
        ));
        assert!(matches!(
            verify_scan_secret(Some("s3cret"), &HeaderMap::new()),
            Err(SentinelError::Unauthorized)
        ));
    }

    #[test]
    fn unconfigured_secret_is_unavailable() {
        assert!(matches!(
            verify_scan_secret(None, &headers(&[("x-scan-secret", "anything")])),
            Err(SentinelError::Unconfigured(_))
        ));
    }
}
