//! Status HTTP Routes
//!
//! Health check, the debug variables page and a role override hook.
//!
//! # Endpoints
//!
//! - `GET /health` - liveness
//! - `GET /debug/vars` - update stream state, counters and binlog bounds
//! - `POST /debug/role` - deliver a role change, e.g. `{"role": "spare"}`

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::updatestream::{NodeRole, UpdateStreamService};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleChangeRequest {
    pub role: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleChangeResponse {
    pub role: NodeRole,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Health check route
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_handler))
}

/// Debug routes bound to one update stream service
pub fn status_routes(service: UpdateStreamService) -> Router {
    Router::new()
        .route("/debug/vars", get(vars_handler))
        .route("/debug/role", post(role_handler))
        .with_state(service)
}

async fn health_handler() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}

/// Renders the service status as the debug variables document.
pub fn debug_vars(service: &UpdateStreamService) -> Value {
    let status = service.status();
    json!({
        "UpdateStreamState": {
            "Current": status.state.as_str(),
            "Epoch": status.epoch,
            "Role": status.role,
        },
        "UpdateStreamStats": service.metrics().to_json(),
        "UpdateStreamSessions": status.sessions,
        "BinlogHead": status.binlog_head,
        "BinlogEarliest": status.earliest_position,
    })
}

async fn vars_handler(State(service): State<UpdateStreamService>) -> impl IntoResponse {
    (StatusCode::OK, Json(debug_vars(&service)))
}

async fn role_handler(
    State(service): State<UpdateStreamService>,
    Json(request): Json<RoleChangeRequest>,
) -> Result<Json<RoleChangeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let role: NodeRole = request.role.parse().map_err(|message| {
        let body = ErrorResponse {
            error: message,
            code: StatusCode::BAD_REQUEST.as_u16(),
        };
        (StatusCode::BAD_REQUEST, Json(body))
    })?;

    let state = service.control().on_role_change(role);
    Ok(Json(RoleChangeResponse {
        role,
        state: state.as_str().to_string(),
    }))
}
