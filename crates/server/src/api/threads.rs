//! Thread endpoints: creation and message access.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use dirigent_core::{ImageAttachment, ThreadMessage};

use crate::api::{internal_error, not_found, QueryErrorResponse};
use crate::auth::check_access;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CreateThreadResponse {
    pub thread_id: String,
    pub project_id: String,
}

/// Create a conversation thread
#[utoipa::path(
    post,
    path = "/threads",
    tag = "Threads",
    request_body = CreateThreadRequest,
    responses((status = 200, description = "Thread created", body = CreateThreadResponse))
)]
pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateThreadRequest>,
) -> Result<Json<CreateThreadResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;
    let project_id = request.project_id.unwrap_or_else(|| "default".to_string());
    let thread = state.threads.create(&project_id).map_err(internal_error)?;
    Ok(Json(CreateThreadResponse {
        thread_id: thread.id,
        project_id: thread.project_id,
    }))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PostMessageRequest {
    pub content: String,
    /// Optional image attachments, normalized into content parts.
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub images: Vec<ImageAttachment>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct PostMessageResponse {
    pub message_count: usize,
}

/// Append a user message to a thread
#[utoipa::path(
    post,
    path = "/thread/{thread_id}/messages",
    tag = "Threads",
    params(("thread_id" = String, Path, description = "Thread ID")),
    request_body = PostMessageRequest,
    responses(
        (status = 200, description = "Message appended", body = PostMessageResponse),
        (status = 404, description = "Thread not found", body = QueryErrorResponse)
    )
)]
pub async fn post_thread_message(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PostMessageRequest>,
) -> Result<Json<PostMessageResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;

    let thread = state
        .threads
        .append(&thread_id, ThreadMessage::user(request.content), &request.images)
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("Thread not found: {thread_id}")))?;

    Ok(Json(PostMessageResponse {
        message_count: thread.messages.len(),
    }))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ThreadMessagesResponse {
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<ThreadMessage>,
}

/// List a thread's messages
#[utoipa::path(
    get,
    path = "/thread/{thread_id}/messages",
    tag = "Threads",
    params(("thread_id" = String, Path, description = "Thread ID")),
    responses(
        (status = 200, description = "Messages in order", body = ThreadMessagesResponse),
        (status = 404, description = "Thread not found", body = QueryErrorResponse)
    )
)]
pub async fn get_thread_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ThreadMessagesResponse>, (StatusCode, Json<QueryErrorResponse>)> {
    check_access(&state, &headers, None)?;

    let thread = state
        .threads
        .get(&thread_id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("Thread not found: {thread_id}")))?;

    Ok(Json(ThreadMessagesResponse {
        messages: thread.messages,
    }))
}
