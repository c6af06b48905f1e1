//! HTTP surface for pairing and the gated command routes.
//!
//! ```text
//! POST /auth/pair      ──► pairing credential + connection URI
//! POST /auth/connect   ──► Bearer <pairing credential> → device credential
//! GET  /session        ──► Bearer <device credential>  → device identity
//! <privileged routes>  ──► behind the same gate
//! ```

pub mod auth;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub use auth::{DeviceIdentity, GateRejection, RequestGate, bearer_token, require_device};

use crate::error::{CredentialError, Error};
use crate::pairing::{PairingFlow, PairingService};

/// JSON error response.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn from_credential(err: CredentialError) -> Self {
        let status = match err {
            CredentialError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            CredentialError::Signing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        let message = match err {
            CredentialError::Signing { .. } => "Internal error".to_string(),
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PairRequest {
    #[serde(default)]
    device_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct PairResponse {
    token: String,
    expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConnectResponse {
    status: &'static str,
    token: String,
    device_id: String,
    device_name: String,
    expires_at: DateTime<Utc>,
}

/// Build the router.
///
/// `privileged` holds the command routes (with their state already applied);
/// every one of them is placed behind [`require_device`].
pub fn router(service: &PairingService, privileged: Router) -> Router {
    let gate = RequestGate::new(Arc::clone(service.validator()));

    let gated = Router::new()
        .route("/session", get(session))
        .merge(privileged)
        .route_layer(middleware::from_fn_with_state(gate, require_device));

    let pairing = Router::new()
        .route("/auth/pair", post(initiate_pairing))
        .route("/auth/connect", post(redeem_pairing))
        .with_state(Arc::clone(service.flow()));

    Router::new()
        .merge(pairing)
        .merge(gated)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve `app` until `shutdown` resolves.
pub async fn serve<F>(addr: &str, app: Router, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server_err = |reason: String| Error::Server {
        addr: addr.to_string(),
        reason,
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| server_err(format!("failed to bind: {e}")))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| server_err(e.to_string()))?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn initiate_pairing(
    State(flow): State<Arc<PairingFlow>>,
    body: Bytes,
) -> Result<Json<PairResponse>, ApiError> {
    let request: PairRequest = parse_optional_json(&body)?;
    let ticket = flow
        .initiate(request.device_name.as_deref())
        .await
        .map_err(ApiError::from_credential)?;

    Ok(Json(PairResponse {
        token: ticket.token,
        expires_at: ticket.expires_at,
        connection_url: ticket.connection_url,
    }))
}

async fn redeem_pairing(
    State(flow): State<Arc<PairingFlow>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConnectResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::bad_request("No token provided"))?;
    let request: PairRequest = parse_optional_json(&body)?;

    let device = flow
        .redeem(token, request.device_name.as_deref())
        .await
        .map_err(ApiError::from_credential)?;

    Ok(Json(ConnectResponse {
        status: "success",
        token: device.token,
        device_id: device.device_id,
        device_name: device.device_name,
        expires_at: device.expires_at,
    }))
}

async fn session(Extension(identity): Extension<DeviceIdentity>) -> Json<DeviceIdentity> {
    Json(identity)
}

/// Parse a JSON body, treating an empty one as `T::default()`.
fn parse_optional_json<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request("Invalid request body"))
}
