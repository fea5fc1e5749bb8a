//! HTTP router construction.
//!
//! Assembles all Axum routes, middleware, and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "dirigent", description = "Tool-using agent runtime API"),
    paths(
        crate::api::health::health,
        crate::api::threads::create_thread,
        crate::api::threads::post_thread_message,
        crate::api::threads::get_thread_messages,
        crate::api::agent_runs::start_agent,
        crate::api::agent_runs::stop_agent,
        crate::api::agent_runs::get_agent_runs,
        crate::api::agent_runs::get_agent_run,
        crate::api::agent_runs::stream_agent_run,
    )
)]
struct ApiDoc;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/threads", post(api::create_thread))
        .route(
            "/thread/{thread_id}/messages",
            get(api::get_thread_messages).post(api::post_thread_message),
        )
        .route("/thread/{thread_id}/agent/start", post(api::start_agent))
        .route("/thread/{thread_id}/agent-runs", get(api::get_agent_runs))
        .route("/agent-run/{agent_run_id}", get(api::get_agent_run))
        .route("/agent-run/{agent_run_id}/stop", post(api::stop_agent))
        .route("/agent-run/{agent_run_id}/stream", get(api::stream_agent_run))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::startup;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dirigent_tool_runtime::provider::mock::MockChunkProvider;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::util::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_config(dir: &tempfile::TempDir) -> dirigent_core::Config {
        let mut config = dirigent_core::Config::from_env();
        config.storage.data_dir = dir.path().to_path_buf();
        config.bus.mode = "local".to_string();
        config.auth.api_token = None;
        config
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = startup::build_app_state(test_config(&dir), None).await.unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn agent_endpoints_answer_503_without_provider() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = startup::build_app_state(test_config(&dir), None).await.unwrap();
        let thread = state.threads.create("p").unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::post(format!("/thread/{}/agent/start", thread.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn start_requires_known_thread() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = std::sync::Arc::new(MockChunkProvider::new());
        let state = startup::build_app_state(test_config(&dir), Some(provider))
            .await
            .unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::post("/thread/missing/agent/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn token_gate_rejects_unauthenticated_requests() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.auth.api_token = Some("secret".to_string());
        let state = startup::build_app_state(config, None).await.unwrap();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/threads")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                Request::post("/threads")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer secret")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_agent_run_flow_over_http() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = std::sync::Arc::new(MockChunkProvider::new());
        provider.queue_text("All set.");
        let state = startup::build_app_state(test_config(&dir), Some(provider))
            .await
            .unwrap();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/threads")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let thread_id = body_json(response).await["thread_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/thread/{thread_id}/agent/start"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "running");
        let run_id = body["agent_run_id"].as_str().unwrap().to_string();

        // Wait for the background run to finish, then fetch the record.
        let controller = state.controller.as_ref().unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let run = controller.get(&run_id).unwrap().unwrap();
            if run.status != dirigent_agent::RunStatus::Running {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "run never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/agent-run/{run_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = body_json(response).await;
        assert_eq!(record["status"], "completed");
        assert!(!record["responses"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(
                Request::get(format!("/thread/{thread_id}/agent-runs"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let list = body_json(response).await;
        assert_eq!(list["agent_runs"].as_array().unwrap().len(), 1);
    }
}
