//! Device credential gate for privileged routes.
//!
//! [`RequestGate::authorize`] is the decision itself: bearer credential in,
//! device identity or rejection out. [`require_device`] adapts it to axum so
//! the router can put it in front of any route group.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::CredentialError;
use crate::pairing::CredentialValidator;

const BEARER_PREFIX: &str = "Bearer ";

/// The device behind an authorized request.
///
/// Inserted into request extensions by [`require_device`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_name: String,
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    MissingCredential,
    Invalid(CredentialError),
}

impl GateRejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::Invalid(e) => e.kind(),
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        // One message for every invalid credential: callers learn nothing
        // about which device ids exist.
        let message = match self {
            Self::MissingCredential => "Authorization token required",
            Self::Invalid(_) => "Invalid or expired device credential",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}

/// Authorization check run before every privileged operation.
#[derive(Debug, Clone)]
pub struct RequestGate {
    validator: Arc<CredentialValidator>,
}

impl RequestGate {
    pub fn new(validator: Arc<CredentialValidator>) -> Self {
        Self { validator }
    }

    /// Resolve the device presenting the bearer credential in `headers`.
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<DeviceIdentity, GateRejection> {
        let token = bearer_token(headers).ok_or(GateRejection::MissingCredential)?;
        let claims = self
            .validator
            .validate_permanent(token)
            .await
            .map_err(GateRejection::Invalid)?;

        Ok(DeviceIdentity {
            device_id: claims.device_id,
            device_name: claims.device_name,
        })
    }
}

/// Extract a non-empty `Authorization: Bearer` credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum middleware that admits only requests from registered devices.
///
/// Wire up with `axum::middleware::from_fn_with_state(gate, require_device)`.
/// CORS preflight requests pass through untouched.
pub async fn require_device(
    State(gate): State<RequestGate>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    match gate.authorize(request.headers()).await {
        Ok(identity) => {
            tracing::debug!(
                device_id = %identity.device_id,
                path = %request.uri().path(),
                "Device authorized"
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(rejection) => {
            tracing::warn!(
                kind = rejection.kind(),
                path = %request.uri().path(),
                "Request rejected"
            );
            rejection.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    use super::*;
    use crate::config::PairingConfig;
    use crate::pairing::PairingService;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    fn service(dir: &TempDir) -> PairingService {
        let config = PairingConfig::new(dir.path().join("auth_data.json"), "gate-test")
            .with_pairing_ttl(TimeDelta::minutes(10));
        PairingService::new(&config)
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Bearer   ")), None);
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_authorize_resolves_device() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let ticket = service.flow().initiate(None).await.unwrap();
        let device = service
            .flow()
            .redeem(&ticket.token, Some("Phone"))
            .await
            .unwrap();

        let gate = RequestGate::new(Arc::clone(service.validator()));
        let identity = gate
            .authorize(&headers_with(&format!("Bearer {}", device.token)))
            .await
            .unwrap();
        assert_eq!(identity.device_id, device.device_id);
        assert_eq!(identity.device_name, "Phone");
    }

    #[tokio::test]
    async fn test_authorize_rejects_missing_and_pairing_credentials() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let gate = RequestGate::new(Arc::clone(service.validator()));

        assert_eq!(
            gate.authorize(&HeaderMap::new()).await.unwrap_err(),
            GateRejection::MissingCredential
        );

        let ticket = service.flow().initiate(None).await.unwrap();
        assert_eq!(
            gate.authorize(&headers_with(&format!("Bearer {}", ticket.token)))
                .await
                .unwrap_err(),
            GateRejection::Invalid(CredentialError::WrongCredentialType)
        );
    }

    #[tokio::test]
    async fn test_rejection_body_is_generic() {
        let unregistered = GateRejection::Invalid(CredentialError::DeviceNotRegistered)
            .into_response();
        let malformed = GateRejection::Invalid(CredentialError::MalformedCredential)
            .into_response();
        assert_eq!(unregistered.status(), StatusCode::UNAUTHORIZED);

        let a = axum::body::to_bytes(unregistered.into_body(), usize::MAX)
            .await
            .unwrap();
        let b = axum::body::to_bytes(malformed.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(a, b);
    }
}
