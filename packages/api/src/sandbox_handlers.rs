// ABOUTME: HTTP request handlers for running commands in a project's sandbox
// ABOUTME: Handles run, status introspection and explicit stop

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::CurrentUser;
use crate::response::{not_found, ok_or_error, ApiResponse};
use crate::AppState;

/// Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::success(json!({ "status": "ok" })))
}

/// Request body for running a command
#[derive(Deserialize)]
pub struct RunCommandRequest {
    pub command: Vec<String>,
}

/// Start or reuse the caller's sandbox and run a command in it
///
/// POST /api/projects/{project_id}/run
pub async fn run_command(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<String>,
    Json(request): Json<RunCommandRequest>,
) -> Response {
    info!(
        "Run requested for project {} by user {}",
        project_id, current_user.id
    );

    let result = state
        .sandboxes
        .service
        .run_command(&current_user.id, &project_id, request.command)
        .await;
    ok_or_error(result, "Failed to run command")
}

/// Sandbox status for a project
///
/// GET /api/projects/{project_id}/sandbox
pub async fn get_sandbox(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<String>,
) -> Response {
    match state
        .sandboxes
        .service
        .status(&current_user.id, &project_id)
        .await
    {
        Ok(Some(view)) => ok_or_error(Ok(view), "Failed to get sandbox"),
        Ok(None) => not_found("Sandbox is not running"),
        Err(e) => ok_or_error::<()>(Err(e), "Failed to get sandbox"),
    }
}

/// Stop a project's sandbox
///
/// DELETE /api/projects/{project_id}/sandbox
pub async fn stop_sandbox(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<String>,
) -> Response {
    info!(
        "Stop requested for project {} by user {}",
        project_id, current_user.id
    );

    let result = state
        .sandboxes
        .service
        .stop_project(&current_user.id, &project_id)
        .await
        .map(|stopped| json!({ "stopped": stopped }));
    ok_or_error(result, "Failed to stop sandbox")
}
