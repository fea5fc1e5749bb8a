mod api;
mod auth;
mod router;
mod startup;
mod state;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dirigent_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = dirigent_core::Config::from_env();
    config.log_summary();

    // The LM client is an external collaborator; wire a ChunkProvider here
    // to enable agent runs. Without one, thread endpoints still work and
    // the agent endpoints answer 503.
    let state = startup::build_app_state(config.clone(), None).await?;

    let app = router::build_router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "dirigent server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown signal received");
    if let Some(controller) = &state.controller {
        controller.shutdown().await;
    }
}
