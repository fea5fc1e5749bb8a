pub mod controller;
pub mod run_log;
pub mod run_store;
pub mod source;
mod supervisor;

pub use controller::{RunController, RunError};
pub use run_log::RunLog;
pub use run_store::{AgentRun, RunStatus, RunStore};
pub use source::{EventSource, EventStream, ProcessorEventSource};
