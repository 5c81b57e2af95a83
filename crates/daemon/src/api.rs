//! HTTP API
//!
//! `GET /health` on every node; the join endpoint answers only on towers.

use crate::join::{join_network, TowerKeys};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use towerlink_common::identity::verifying_key_from_hex;
use towerlink_common::{Error, HealthResponse, JoinRequest, MembershipStore, NodeRole};
use tracing::error;

/// Shared application state
pub struct AppState {
    pub role: NodeRole,
    pub store: MembershipStore,
    /// Present on towers only
    pub tower: Option<TowerKeys>,
}

/// Error returned by handlers, rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Domain(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Domain(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(e) => match e {
                Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
                Error::NotFound { .. } => StatusCode::NOT_FOUND,
                Error::Conflict(_) => StatusCode::CONFLICT,
                Error::WrongRole { .. } => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Domain(e) => {
                if status.is_server_error() {
                    error!("Join failed: {}", e);
                }
                e.to_string()
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Create router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/servers/network/:network_id/connect", post(join_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_type: state.role,
    })
}

async fn join_handler(
    State(state): State<Arc<AppState>>,
    Path(network_id): Path<String>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let tower = match (&state.role, &state.tower) {
        (NodeRole::Tower, Some(tower)) => tower.clone(),
        (role, _) => {
            return Err(Error::WrongRole {
                expected: NodeRole::Tower.to_string(),
                actual: role.to_string(),
            }
            .into())
        }
    };

    let Json(request) =
        payload.map_err(|e| ApiError::BadRequest(format!("Invalid JSON payload: {}", e)))?;
    if request.public_key.trim().is_empty() || request.wg_public_key.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "public_key and wg_public_key are required".to_string(),
        ));
    }
    verifying_key_from_hex(&request.public_key)
        .map_err(|e| ApiError::BadRequest(format!("Invalid public_key: {}", e)))?;

    let store = state.store.clone();
    let response = tokio::task::spawn_blocking(move || {
        join_network(&store, &tower, &network_id, &request)
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(response))
}
