// ABOUTME: HTTP API layer for Sandpit providing REST endpoints and the terminal WebSocket
// ABOUTME: Integration layer between the router and the sandbox subsystem

use axum::{
    routing::{get, post},
    Router,
};
use sandpit_sandbox::{IdentityProvider, Sandboxes};
use std::sync::Arc;

pub mod auth;
pub mod response;
pub mod sandbox_handlers;
pub mod terminal_handlers;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub sandboxes: Arc<Sandboxes>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(sandboxes: Arc<Sandboxes>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            sandboxes,
            identity,
        }
    }
}

/// Creates the full API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(sandbox_handlers::health))
        .nest("/api/projects/{project_id}", create_sandbox_router())
        .with_state(state)
}

/// Creates the per-project sandbox router (nested under /api/projects/{project_id})
pub fn create_sandbox_router() -> Router<AppState> {
    Router::new()
        .route("/run", post(sandbox_handlers::run_command))
        .route(
            "/sandbox",
            get(sandbox_handlers::get_sandbox).delete(sandbox_handlers::stop_sandbox),
        )
        .route("/terminal", get(terminal_handlers::open_terminal))
}
