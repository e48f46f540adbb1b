//! HTTP Basic authentication for the trigger routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::header;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::Digest;
use sha2::Sha256;

use crate::error::SnapshotError;
use crate::error::ValidationError;

/// Username to password table.
#[derive(Clone, Default)]
pub struct BasicAuthUsers {
    users: HashMap<String, String>,
}

impl BasicAuthUsers {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Check an `Authorization` header, returning the authenticated user.
    pub fn verify(&self, header: Option<&HeaderValue>) -> Result<String, ValidationError> {
        let (user, password) = header
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic)
            .ok_or(ValidationError::Unauthorized)?;

        // Unknown users still pay for a comparison.
        let (known, expected) = match self.users.get(&user) {
            Some(expected) => (true, expected.as_str()),
            None => (false, ""),
        };

        if digests_equal(password.as_bytes(), expected.as_bytes()) && known {
            Ok(user)
        } else {
            Err(ValidationError::Unauthorized)
        }
    }
}

/// Split `Basic <base64(user:password)>` into its parts.
fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Compare SHA-256 digests of both sides without short-circuiting.
fn digests_equal(given: &[u8], expected: &[u8]) -> bool {
    let given = Sha256::digest(given);
    let expected = Sha256::digest(expected);
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Middleware rejecting requests without valid credentials.
pub async fn require_basic_auth(
    State(users): State<Arc<BasicAuthUsers>>,
    request: Request,
    next: Next,
) -> Response {
    match users.verify(request.headers().get(header::AUTHORIZATION)) {
        Ok(user) => {
            tracing::debug!(%user, "Authenticated trigger request");
            next.run(request).await
        }
        Err(e) => {
            tracing::info!("Rejected trigger request: {}", e);
            SnapshotError::from(e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> BasicAuthUsers {
        BasicAuthUsers::new(HashMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]))
    }

    fn basic(user: &str, password: &str) -> HeaderValue {
        let encoded = STANDARD.encode(format!("{}:{}", user, password));
        HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap()
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(
            parse_basic("Basic YWxpY2U6c2VjcmV0"),
            Some(("alice".to_string(), "secret".to_string()))
        );
        // Passwords may contain colons.
        assert_eq!(
            parse_basic(&format!("basic {}", STANDARD.encode("bob:a:b"))),
            Some(("bob".to_string(), "a:b".to_string()))
        );
        assert_eq!(parse_basic("Bearer YWxpY2U6c2VjcmV0"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
        assert_eq!(parse_basic(&format!("Basic {}", STANDARD.encode("nocolon"))), None);
    }

    #[test]
    fn test_digests_equal() {
        assert!(digests_equal(b"secret", b"secret"));
        assert!(!digests_equal(b"secret", b"Secret"));
        assert!(!digests_equal(b"secret", b"secret "));
        assert!(!digests_equal(b"", b"secret"));
    }

    #[test]
    fn test_verify() {
        let users = users();
        assert_eq!(users.verify(Some(&basic("alice", "secret"))).unwrap(), "alice");

        for (user, password) in [("alice", "wrong"), ("mallory", "secret"), ("mallory", ""), ("", "")] {
            assert!(matches!(
                users.verify(Some(&basic(user, password))),
                Err(ValidationError::Unauthorized)
            ));
        }
        assert!(matches!(users.verify(None), Err(ValidationError::Unauthorized)));
    }
}
