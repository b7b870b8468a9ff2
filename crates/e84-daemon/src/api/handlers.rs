//! REST handlers. Every mutating endpoint is a thin pass-through to
//! [`e84_core::ControllerFacade`] — no protocol logic lives here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use e84_core::{ConfigError, ControllerFacade, ControllerMode, Error, StatusSnapshot};

/// RFC 7807-shaped problem response, matching how this stack reports every
/// non-2xx API result.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub detail: String,
    pub status: u16,
}

impl ErrorResponse {
    fn from_error(err: &Error, status: StatusCode) -> Self {
        ErrorResponse {
            kind: format!("https://e84ctl.local/errors/{}", error_slug(err)),
            title: status.canonical_reason().unwrap_or("error").to_string(),
            detail: err.to_string(),
            status: status.as_u16(),
        }
    }
}

fn error_slug(err: &Error) -> &'static str {
    match err {
        Error::Protocol(_) => "protocol",
        Error::Port(_) => "port",
        Error::Transport(_) => "transport",
        Error::Config(_) => "config",
        Error::EmergencyStop => "emergency-stop",
        Error::ReentrantDispatch => "reentrant-dispatch",
        Error::WrongDirection(_) => "wrong-direction",
        Error::DuplicateSignal(_) => "duplicate-signal",
    }
}

/// Maps a core `Error` onto a response; emergency-stop and protocol
/// rejections are client errors (409 Conflict — the request was valid but
/// the controller's current state refuses it), everything else a 500.
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::EmergencyStop
            | Error::Protocol(_)
            | Error::WrongDirection(_)
            | Error::DuplicateSignal(_) => StatusCode::CONFLICT,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Port(_) | Error::Transport(_) | Error::ReentrantDispatch => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse::from_error(&self.0, status))).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Liveness probe.
#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// Current controller state, signals, mode, and transition history (spec
/// §4.5 observer surface). Not listed in the OpenAPI document: its body,
/// [`StatusSnapshot`], lives in the dependency-minimal core crate and
/// deliberately carries no `utoipa` derive.
pub async fn status(State(facade): State<Arc<ControllerFacade>>) -> Json<StatusSnapshot> {
    Json(facade.status().await)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub ok: bool,
}

const OK: SuccessResponse = SuccessResponse { ok: true };

/// Operator reset (spec §4.5, §7, §8 scenario 6). Rejected with 409 while
/// any AMHS input is still asserted or the port isn't clean.
#[utoipa::path(post, path = "/api/v1/reset", responses(
    (status = 200, body = SuccessResponse),
    (status = 409, body = ErrorResponse),
))]
pub async fn reset(
    State(facade): State<Arc<ControllerFacade>>,
) -> Result<Json<SuccessResponse>, ApiError> {
    facade.reset().await.map_err(ApiError)?;
    Ok(Json(OK))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModeRequest {
    /// One of `auto`, `manual`, `maintenance`, `fault`.
    pub mode: String,
}

/// Change operating mode (spec §4.5). Entering `auto` is refused unless
/// the port reports ready and `ES` is de-asserted.
#[utoipa::path(post, path = "/api/v1/mode", request_body = SetModeRequest, responses(
    (status = 200, body = SuccessResponse),
    (status = 400, body = ErrorResponse),
    (status = 409, body = ErrorResponse),
))]
pub async fn set_mode(
    State(facade): State<Arc<ControllerFacade>>,
    Json(body): Json<SetModeRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let mode = match body.mode.to_lowercase().as_str() {
        "auto" => ControllerMode::Auto,
        "manual" => ControllerMode::Manual,
        "maintenance" => ControllerMode::Maintenance,
        "fault" => ControllerMode::Fault,
        other => {
            return Err(ApiError(Error::Config(ConfigError::UnmappedSignal(
                format!("unknown mode '{other}'"),
            ))))
        }
    };
    facade.set_mode(mode).await.map_err(ApiError)?;
    Ok(Json(OK))
}

/// Operator-initiated graceful stop (distinct from the AMHS `ES` line).
#[utoipa::path(post, path = "/api/v1/stop", responses((status = 200, body = SuccessResponse)))]
pub async fn stop(
    State(facade): State<Arc<ControllerFacade>>,
) -> Result<Json<SuccessResponse>, ApiError> {
    facade.request_stop().await.map_err(ApiError)?;
    Ok(Json(OK))
}
