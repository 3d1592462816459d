//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::event::PushEvent;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "servicesync".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Webhook acknowledgement
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookResponse {
    /// Number of targets a redeploy was started for
    pub matched: usize,
}

fn accepted(matched: usize) -> (StatusCode, Json<WebhookResponse>) {
    (StatusCode::ACCEPTED, Json(WebhookResponse { matched }))
}

/// Registry push webhook handler
///
/// Answers as soon as the runs are dispatched. Payloads that cannot be read
/// are acknowledged with zero matches so the sender does not retry them.
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if token != state.webhook_token {
        warn!("Rejected webhook with unknown token");
        return Err(StatusCode::NOT_FOUND);
    }

    let event = match PushEvent::from_body(&body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            warn!("Webhook payload lacks repository or tag, ignoring");
            return Ok(accepted(0));
        }
        Err(e) => {
            warn!("Unreadable webhook payload: {}", e);
            return Ok(accepted(0));
        }
    };

    info!(
        "Received push of {}:{} (pushed at {})",
        event.repository_name, event.tag, event.pushed_at
    );
    let dispatch = state.dispatcher.dispatch(event);
    Ok(accepted(dispatch.matched()))
}
