//! # Shared-Secret Authentication
//!
//! Two schemes, both carried in the `Authorization` header:
//!
//! ```text
//! Authorization: SyncToken <shared secret>   /sync/receive, /sync/master-data
//! Authorization: Bearer <admin token>        /sync/trigger
//! ```
//!
//! Secrets are compared in constant time. An instance with no secret
//! configured rejects every request of that scheme.

use axum::http::HeaderMap;
use cmov::Cmov;

use crate::error::{SyncError, SyncResult};

pub const SYNC_TOKEN_SCHEME: &str = "SyncToken";
pub const BEARER_SCHEME: &str = "Bearer";

/// Extracts the credential of `scheme` from the `Authorization` header.
pub fn extract_credential<'a>(headers: &'a HeaderMap, scheme: &str) -> SyncResult<&'a str> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| SyncError::Unauthorized("Missing Authorization header".into()))?
        .to_str()
        .map_err(|_| SyncError::Unauthorized("Authorization header is not valid UTF-8".into()))?;

    let (found, token) = header
        .split_once(' ')
        .ok_or_else(|| SyncError::Unauthorized(format!("Authorization header must be `{scheme} <token>`")))?;

    if !found.eq_ignore_ascii_case(scheme) {
        return Err(SyncError::Unauthorized(format!(
            "Authorization scheme must be `{scheme}`"
        )));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(SyncError::Unauthorized("Empty credential".into()));
    }
    Ok(token)
}

/// Checks the `SyncToken` credential against the configured shared secret.
pub fn verify_sync_token(headers: &HeaderMap, expected: Option<&str>) -> SyncResult<()> {
    verify(headers, SYNC_TOKEN_SCHEME, expected, "Invalid sync token")
}

/// Checks the `Bearer` credential against the configured admin token.
pub fn verify_admin_token(headers: &HeaderMap, expected: Option<&str>) -> SyncResult<()> {
    verify(headers, BEARER_SCHEME, expected, "Admin only")
}

fn verify(headers: &HeaderMap, scheme: &str, expected: Option<&str>, denied: &str) -> SyncResult<()> {
    let expected = expected
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| SyncError::Unauthorized(format!("{scheme} authentication is not configured")))?;

    let presented = extract_credential(headers, scheme)?;
    if ct_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(SyncError::Unauthorized(denied.to_string()))
    }
}

/// Constant-time byte comparison. Only the length check short-circuits.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut equal = 1u8;
    a.iter()
        .zip(b.iter())
        .for_each(|(x, y)| equal.cmovz(&0u8, u8::from(x == y)));

    equal != 0u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"secret", b"secret"));
        assert!(!ct_eq(b"secret", b"secreT"));
        assert!(!ct_eq(b"secret", b"secret2"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn test_sync_token_accepted() {
        assert!(verify_sync_token(&headers("SyncToken s3cret"), Some("s3cret")).is_ok());
        assert!(verify_sync_token(&headers("synctoken s3cret"), Some("s3cret")).is_ok());
    }

    #[test]
    fn test_sync_token_rejected() {
        let wrong = verify_sync_token(&headers("SyncToken nope"), Some("s3cret")).unwrap_err();
        assert!(wrong.is_auth_error());

        assert!(verify_sync_token(&headers("Bearer s3cret"), Some("s3cret")).is_err());
        assert!(verify_sync_token(&headers("SyncToken"), Some("s3cret")).is_err());
        assert!(verify_sync_token(&HeaderMap::new(), Some("s3cret")).is_err());
    }

    #[test]
    fn test_unconfigured_secret_rejects_everything() {
        assert!(verify_sync_token(&headers("SyncToken anything"), None).is_err());
        assert!(verify_sync_token(&headers("SyncToken "), Some("")).is_err());
    }

    #[test]
    fn test_admin_token() {
        assert!(verify_admin_token(&headers("Bearer adm1n"), Some("adm1n")).is_ok());
        assert!(verify_admin_token(&headers("SyncToken adm1n"), Some("adm1n")).is_err());
        assert!(verify_admin_token(&headers("Bearer adm1n"), None).is_err());
    }
}
