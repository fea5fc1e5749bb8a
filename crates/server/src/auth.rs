//! Thin shared-token gate. The real authentication layer sits in front of
//! this service; with no token configured the API is open.

use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::api::QueryErrorResponse;
use crate::state::AppState;

/// Extract a bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Check request credentials against the configured API token.
/// `query_token` supports the SSE path, where EventSource clients cannot
/// set headers.
pub fn check_access(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<(), (StatusCode, Json<QueryErrorResponse>)> {
    let Some(expected) = state.config.auth.api_token.as_deref() else {
        return Ok(());
    };

    let provided = query_token.or_else(|| bearer_token(headers));
    if provided == Some(expected) {
        return Ok(());
    }

    Err((
        StatusCode::FORBIDDEN,
        Json(QueryErrorResponse {
            error: "Access denied".to_string(),
        }),
    ))
}
