//! API endpoint modules.
//!
//! Shared response types and the controller guard live here in mod.rs.

pub mod agent_runs;
pub mod health;
pub mod threads;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;
use dirigent_agent::RunController;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueryErrorResponse {
    pub error: String,
}

// ── Controller guard ─────────────────────────────────────────────

/// Return 503 if the run controller is not configured (no LM provider).
pub(crate) fn require_controller(
    state: &AppState,
) -> Result<Arc<RunController>, (StatusCode, Json<QueryErrorResponse>)> {
    state.controller.clone().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(QueryErrorResponse {
                error: "Agent runs not configured. Check LM provider settings.".to_string(),
            }),
        )
    })
}

pub(crate) fn internal_error(message: impl std::fmt::Display) -> (StatusCode, Json<QueryErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(QueryErrorResponse {
            error: message.to_string(),
        }),
    )
}

pub(crate) fn not_found(message: impl std::fmt::Display) -> (StatusCode, Json<QueryErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(QueryErrorResponse {
            error: message.to_string(),
        }),
    )
}

// ── Re-exports ───────────────────────────────────────────────────

pub use agent_runs::{get_agent_run, get_agent_runs, start_agent, stop_agent, stream_agent_run};
pub use health::health;
pub use threads::{create_thread, get_thread_messages, post_thread_message};
