use std::sync::Arc;

use dirigent_agent::RunController;
use dirigent_core::Config;
use dirigent_thread::ThreadStore;

/// Shared application state for all handlers.
pub struct AppState {
    pub config: Config,
    pub threads: Arc<ThreadStore>,
    /// Run controller; None when no LM provider is configured, in which
    /// case the agent endpoints answer 503.
    pub controller: Option<Arc<RunController>>,
}
