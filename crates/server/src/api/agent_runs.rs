//! Agent run endpoints: start, stop, inspect, and SSE streaming.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use dirigent_agent::{AgentRun, RunError};

use crate::api::{internal_error, not_found, require_controller, QueryErrorResponse};
use crate::auth::check_access;
use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct StartAgentResponse {
    pub agent_run_id: String,
    pub status: &'static str,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct StopAgentResponse {
    pub status: &'static str,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AgentRunResponse {
    pub id: String,
    pub thread_id: String,
    pub status: String,
    #[schema(value_type = String)]
    pub started_at: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub responses: Vec<Value>,
}

impl From<AgentRun> for AgentRunResponse {
    fn from(run: AgentRun) -> Self {
        Self {
            id: run.id,
            thread_id: run.thread_id,
            status: run.status.as_str().to_string(),
            started_at: run.started_at,
            completed_at: run.completed_at,
            error: run.error,
            responses: run.responses,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AgentRunsListResponse {
    pub agent_runs: Vec<AgentRunResponse>,
}

fn map_run_error(e: RunError) -> (StatusCode, Json<QueryErrorResponse>) {
    match e {
        RunError::ThreadNotFound(_) | RunError::RunNotFound(_) => not_found(e),
        other => internal_error(other),
    }
}

/// Start a background agent run for a thread
#[utoipa::path(
    post,
    path = "/thread/{thread_id}/agent/start",
    tag = "Agent",
    params(("thread_id" = String, Path, description = "Thread ID")),
    responses(
        (status = 200, description = "Run started", body = StartAgentResponse),
        (status = 403, description = "Access denied", body = QueryErrorResponse),
        (status = 404, description = "Thread not found", body = QueryErrorResponse),
        (status = 503, description = "Agent runs not configured", body = QueryErrorResponse)
    )
)]
pub async fn start_agent(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StartAgentResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;
    let controller = require_controller(&state)?;

    info!(thread = %thread_id, "starting agent run");
    let run = controller.start(&thread_id).await.map_err(map_run_error)?;

    Ok(Json(StartAgentResponse {
        agent_run_id: run.id,
        status: "running",
    }))
}

/// Stop a running agent
#[utoipa::path(
    post,
    path = "/agent-run/{agent_run_id}/stop",
    tag = "Agent",
    params(("agent_run_id" = String, Path, description = "Agent run ID")),
    responses(
        (status = 200, description = "Run stopped", body = StopAgentResponse),
        (status = 404, description = "Run not found", body = QueryErrorResponse)
    )
)]
pub async fn stop_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StopAgentResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;
    let controller = require_controller(&state)?;

    controller.stop(&agent_run_id).await.map_err(map_run_error)?;
    Ok(Json(StopAgentResponse { status: "stopped" }))
}

/// List all agent runs for a thread
#[utoipa::path(
    get,
    path = "/thread/{thread_id}/agent-runs",
    tag = "Agent",
    params(("thread_id" = String, Path, description = "Thread ID")),
    responses(
        (status = 200, description = "Runs for the thread", body = AgentRunsListResponse),
        (status = 404, description = "Thread not found", body = QueryErrorResponse)
    )
)]
pub async fn get_agent_runs(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AgentRunsListResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;
    let controller = require_controller(&state)?;

    if state.threads.get(&thread_id).map_err(internal_error)?.is_none() {
        return Err(not_found(format!("Thread not found: {thread_id}")));
    }

    let runs = controller
        .list_by_thread(&thread_id)
        .map_err(map_run_error)?;
    Ok(Json(AgentRunsListResponse {
        agent_runs: runs.into_iter().map(Into::into).collect(),
    }))
}

/// Get an agent run record
#[utoipa::path(
    get,
    path = "/agent-run/{agent_run_id}",
    tag = "Agent",
    params(("agent_run_id" = String, Path, description = "Agent run ID")),
    responses(
        (status = 200, description = "Run record", body = AgentRunResponse),
        (status = 404, description = "Run not found", body = QueryErrorResponse)
    )
)]
pub async fn get_agent_run(
    State(state): State<Arc<AppState>>,
    Path(agent_run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AgentRunResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;
    let controller = require_controller(&state)?;

    let run = controller
        .get(&agent_run_id)
        .map_err(map_run_error)?
        .ok_or_else(|| not_found(format!("Agent run not found: {agent_run_id}")))?;
    Ok(Json(run.into()))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// Stream an agent run's events over SSE
///
/// Replays everything already recorded, tails the run while it is live,
/// and always ends with a `{type:status, status:completed}` event.
#[utoipa::path(
    get,
    path = "/agent-run/{agent_run_id}/stream",
    tag = "Agent",
    params(
        ("agent_run_id" = String, Path, description = "Agent run ID"),
        ("token" = Option<String>, Query, description = "Access token (EventSource clients cannot set headers)")
    ),
    responses(
        (status = 200, description = "SSE stream of run events", content_type = "text/event-stream"),
        (status = 404, description = "Run not found", body = QueryErrorResponse)
    )
)]
pub async fn stream_agent_run(
    State(state): State<Arc<AppState>>,
    Path(agent_run_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<impl axum::response::IntoResponse, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, query.token.as_deref())?;
    let controller = require_controller(&state)?;

    info!(run = %agent_run_id, "opening run event stream");
    let rx = controller
        .stream(&agent_run_id)
        .await
        .map_err(map_run_error)?;

    use tokio_stream::StreamExt;
    let sse_stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    // Proxies must not buffer or cache the stream.
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(sse_stream),
    ))
}
