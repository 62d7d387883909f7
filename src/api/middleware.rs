//! HTTP middleware for API layer.

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    middleware::Next,
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt::Write;
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;
use crate::domain::{AppError, GatewayError};

type HmacSha256 = Hmac<Sha256>;

/// Constant-time comparison of two byte slices to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Bearer-token authentication middleware.
/// Verifies the `Authorization: Bearer <token>` header and injects the
/// decoded [`crate::app::AuthUser`] into request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(token) = header.and_then(|h| h.strip_prefix("Bearer ")) else {
        warn!("auth failed: missing bearer token");
        return AppError::Authentication("missing bearer token".to_string()).into_response();
    };

    match state.tokens.verify(token) {
        Ok(auth_user) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(e) => {
            warn!("auth failed: {e}");
            e.into_response()
        }
    }
}

/// Check a webhook body against its hex HMAC-SHA256 signature.
/// The comparison is constant-time.
pub fn verify_webhook_signature(
    secret: &SecretString,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), AppError> {
    let Some(provided) = signature else {
        warn!("webhook rejected: missing signature header");
        return Err(AppError::Gateway(GatewayError::InvalidSignature));
    };

    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| AppError::Internal(format!("webhook secret unusable: {e}")))?;
    mac.update(body);
    let expected = hex_encode(&mac.finalize().into_bytes());

    if !constant_time_eq(expected.as_bytes(), provided.trim().as_bytes()) {
        warn!("webhook rejected: signature mismatch");
        return Err(AppError::Gateway(GatewayError::InvalidSignature));
    }

    Ok(())
}

/// Compute the signature a caller must present for a webhook body.
/// Used by tests and by gateway simulators.
pub fn sign_webhook_body(secret: &SecretString, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex_encode(&mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("whsec_test".to_string())
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"type":"checkout.session.completed","session_id":"cs_1"}"#;
        let sig = sign_webhook_body(&secret(), body);
        assert!(verify_webhook_signature(&secret(), body, Some(&sig)).is_ok());
    }

    #[test]
    fn test_missing_signature_rejected() {
        let result = verify_webhook_signature(&secret(), b"{}", None);
        assert!(matches!(
            result,
            Err(AppError::Gateway(GatewayError::InvalidSignature))
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign_webhook_body(&secret(), b"original body");
        let result = verify_webhook_signature(&secret(), b"tampered body", Some(&sig));
        assert!(matches!(
            result,
            Err(AppError::Gateway(GatewayError::InvalidSignature))
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign_webhook_body(&SecretString::from("other".to_string()), b"body");
        let result = verify_webhook_signature(&secret(), b"body", Some(&sig));
        assert!(matches!(
            result,
            Err(AppError::Gateway(GatewayError::InvalidSignature))
        ));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x0a]), "00ff0a");
    }
}
