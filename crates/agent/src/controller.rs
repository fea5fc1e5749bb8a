//! Agent run controller: at-most-one-active-run-per-project semantics,
//! durable status transitions, cross-instance stop signalling, late-join
//! stream replay, and crash recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use dirigent_stellwerk::{global_channel, instance_channel, ControlBus, ControlFrame, ControlSignal, PresenceRegistry, StellwerkError};
use dirigent_thread::ThreadStore;

use crate::run_log::RunLog;
use crate::run_store::{AgentRun, RunStatus, RunStore};
use crate::source::EventSource;
use crate::supervisor;

/// How often a stream tail polls the in-memory log.
pub(crate) const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

const STATUS_WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("thread not found: {0}")]
    ThreadNotFound(String),
    #[error("agent run not found: {0}")]
    RunNotFound(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("bus error: {0}")]
    Bus(#[from] StellwerkError),
    #[error("event source error: {0}")]
    Source(String),
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Supervises background agent runs for one server instance.
pub struct RunController {
    instance_id: String,
    runs: Arc<RunStore>,
    threads: Arc<ThreadStore>,
    bus: Arc<dyn ControlBus>,
    presence: Arc<PresenceRegistry>,
    source: Arc<dyn EventSource>,
    active: Mutex<HashMap<String, Arc<RunLog>>>,
}

impl RunController {
    pub fn new(
        runs: Arc<RunStore>,
        threads: Arc<ThreadStore>,
        bus: Arc<dyn ControlBus>,
        presence: Arc<PresenceRegistry>,
        source: Arc<dyn EventSource>,
    ) -> Arc<Self> {
        // Short instance id, unique per process.
        let instance_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        info!(instance = %instance_id, "run controller initialized");
        Arc::new(Self {
            instance_id,
            runs,
            threads,
            bus,
            presence,
            source,
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Start a background run for a thread. Any run already running in the
    /// same project is stopped first.
    pub async fn start(self: &Arc<Self>, thread_id: &str) -> Result<AgentRun, RunError> {
        let thread = self
            .threads
            .get(thread_id)?
            .ok_or_else(|| RunError::ThreadNotFound(thread_id.to_string()))?;

        if let Some(previous) = self.runs.running_in_project(&thread.project_id)? {
            info!(previous = %previous, "stopping existing run in project before starting a new one");
            self.stop(&previous).await?;
        }

        let run = self.runs.create(thread_id, &thread.project_id)?;
        let log = Arc::new(RunLog::new());
        self.active
            .lock()
            .unwrap()
            .insert(run.id.clone(), log.clone());
        self.presence.register(&self.instance_id, &run.id);

        tokio::spawn(supervisor::supervise(self.clone(), run.clone(), log));
        Ok(run)
    }

    /// Stop a run: persist the terminal status, then publish STOP on the
    /// global channel and on each instance channel found via presence.
    /// Idempotent; publish failures are logged and non-fatal.
    pub async fn stop(&self, run_id: &str) -> Result<(), RunError> {
        if self.runs.get(run_id)?.is_none() {
            return Err(RunError::RunNotFound(run_id.to_string()));
        }
        info!(run = %run_id, "stopping agent run");

        self.finish_with_retry(run_id, RunStatus::Stopped, None, None)
            .await?;

        let publisher = self.bus.publisher();
        if let Err(e) = publisher
            .publish(ControlFrame::new(
                global_channel(run_id),
                ControlSignal::Stop,
                &self.instance_id,
            ))
            .await
        {
            warn!(run = %run_id, error = %e, "failed to publish STOP on global channel");
        }

        for instance in self.presence.instances_for_run(run_id) {
            if let Err(e) = publisher
                .publish(ControlFrame::new(
                    instance_channel(run_id, &instance),
                    ControlSignal::Stop,
                    &self.instance_id,
                ))
                .await
            {
                warn!(run = %run_id, instance = %instance, error = %e, "failed to publish STOP to instance");
            }
        }
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> Result<Option<AgentRun>, RunError> {
        Ok(self.runs.get(run_id)?)
    }

    pub fn list_by_thread(&self, thread_id: &str) -> Result<Vec<AgentRun>, RunError> {
        Ok(self.runs.list_by_thread(thread_id)?)
    }

    /// Open an event stream for a run: replays everything already in the
    /// in-memory log, tails it while the run is live, and always ends with
    /// a synthetic `{status: completed}` event.
    pub async fn stream(self: &Arc<Self>, run_id: &str) -> Result<mpsc::Receiver<Value>, RunError> {
        let run = self
            .runs
            .get(run_id)?
            .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))?;
        let log = self.log_handle(run_id);

        let (tx, rx) = mpsc::channel::<Value>(64);
        let controller = self.clone();
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            match log {
                Some(log) => {
                    let mut sent = 0usize;
                    for event in log.snapshot().await {
                        sent += 1;
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }

                    if run.status == RunStatus::Running {
                        loop {
                            for event in log.entries_from(sent).await {
                                sent += 1;
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            if !controller.is_active(&run_id) {
                                // Supervisor is done; drain what remains.
                                for event in log.entries_from(sent).await {
                                    if tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                                break;
                            }
                            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
                        }
                    }
                }
                None => {
                    warn!(run = %run_id, "run has no live log; streaming stored status only");
                    let _ = tx
                        .send(serde_json::json!({
                            "type": "status",
                            "status": run.status.as_str(),
                            "message": "Run data not available for streaming"
                        }))
                        .await;
                }
            }

            let _ = tx
                .send(serde_json::json!({"type": "status", "status": "completed"}))
                .await;
        });

        Ok(rx)
    }

    /// Crash recovery at process start; see [`RunStore::fail_interrupted`].
    pub fn recover_interrupted_runs(&self) -> Result<usize, RunError> {
        Ok(self.runs.fail_interrupted()?)
    }

    /// Shutdown sweep: stop every run this instance still advertises.
    pub async fn shutdown(&self) {
        let runs = self.presence.runs_for_instance(&self.instance_id);
        info!(count = runs.len(), "stopping active runs on shutdown");
        for run_id in runs {
            if let Err(e) = self.stop(&run_id).await {
                error!(run = %run_id, error = %e, "failed to stop run during shutdown");
            }
        }
    }

    pub(crate) fn log_handle(&self, run_id: &str) -> Option<Arc<RunLog>> {
        self.active.lock().unwrap().get(run_id).cloned()
    }

    pub(crate) fn is_active(&self, run_id: &str) -> bool {
        self.active.lock().unwrap().contains_key(run_id)
    }

    pub(crate) fn deactivate(&self, run_id: &str) {
        self.active.lock().unwrap().remove(run_id);
    }

    pub(crate) fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub(crate) fn bus(&self) -> &Arc<dyn ControlBus> {
        &self.bus
    }

    pub(crate) fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub(crate) fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    /// Status writes are the system of record for external observers, so
    /// they are retried with exponential backoff.
    pub(crate) async fn finish_with_retry(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
        responses: Option<Vec<Value>>,
    ) -> Result<bool, RunError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .runs
                .finish(run_id, status, error.clone(), responses.clone())
            {
                Ok(written) => return Ok(written),
                Err(e) => {
                    attempt += 1;
                    if attempt >= STATUS_WRITE_ATTEMPTS {
                        error!(run = %run_id, error = %e, "failed to update run status after all retries");
                        return Err(RunError::Store(e.to_string()));
                    }
                    let wait = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                    warn!(
                        run = %run_id,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "status write failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
