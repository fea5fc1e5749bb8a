//! File-backed agent run store — one JSON file per run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle status of an agent run. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// One supervised execution of the agent loop against a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub thread_id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Serialized event log, persisted when the run finishes.
    #[serde(default)]
    pub responses: Vec<Value>,
}

/// Error recorded on runs orphaned by a process restart.
pub const RESTART_ERROR: &str = "Server restarted while agent was running";

/// File-based run store — one JSON file per run.
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("agent-runs");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create run dir: {}", dir.display()))?;
        info!(path = %dir.display(), "run store initialized");
        Ok(Self { dir })
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist a new run in `running` state.
    pub fn create(&self, thread_id: &str, project_id: &str) -> Result<AgentRun> {
        let run = AgentRun {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            project_id: project_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            responses: Vec::new(),
        };
        self.save(&run)?;
        info!(id = %run.id, thread = %thread_id, "agent run created");
        Ok(run)
    }

    pub fn get(&self, id: &str) -> Result<Option<AgentRun>> {
        let path = self.run_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read run: {}", id))?;
        let run = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse run: {}", id))?;
        Ok(Some(run))
    }

    /// Transition a run into a terminal state. Returns false without
    /// writing when the run is missing or already terminal.
    pub fn finish(
        &self,
        id: &str,
        status: RunStatus,
        error: Option<String>,
        responses: Option<Vec<Value>>,
    ) -> Result<bool> {
        let Some(mut run) = self.get(id)? else {
            return Ok(false);
        };
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = status;
        run.completed_at = Some(Utc::now());
        if error.is_some() {
            run.error = error;
        }
        if let Some(responses) = responses {
            run.responses = responses;
        }
        self.save(&run)?;
        info!(id = %id, status = status.as_str(), "agent run finished");
        Ok(true)
    }

    /// All runs for a thread, newest first.
    pub fn list_by_thread(&self, thread_id: &str) -> Result<Vec<AgentRun>> {
        let mut runs: Vec<AgentRun> = self
            .load_all()?
            .into_iter()
            .filter(|r| r.thread_id == thread_id)
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// All runs persisted as `running` (crash-recovery scan).
    pub fn list_running(&self) -> Result<Vec<AgentRun>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|r| r.status == RunStatus::Running)
            .collect())
    }

    /// Id of any running run in a project, if one exists.
    pub fn running_in_project(&self, project_id: &str) -> Result<Option<String>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|r| r.project_id == project_id && r.status == RunStatus::Running)
            .map(|r| r.id))
    }

    /// Crash recovery: runs persisted as `running` have no supervisor
    /// after a restart and are transitioned to failed.
    pub fn fail_interrupted(&self) -> Result<usize> {
        let interrupted = self.list_running()?;
        for run in &interrupted {
            warn!(run = %run.id, "found running agent run from before server restart");
            self.finish(
                &run.id,
                RunStatus::Failed,
                Some(RESTART_ERROR.to_string()),
                None,
            )?;
        }
        Ok(interrupted.len())
    }

    fn load_all(&self) -> Result<Vec<AgentRun>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match std::fs::read_to_string(&path)
                    .map_err(anyhow::Error::from)
                    .and_then(|data| serde_json::from_str::<AgentRun>(&data).map_err(Into::into))
                {
                    Ok(run) => runs.push(run),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt run"),
                }
            }
        }
        Ok(runs)
    }

    fn save(&self, run: &AgentRun) -> Result<()> {
        let path = self.run_path(&run.id);
        let data = serde_json::to_string_pretty(run)?;
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write run: {}", run.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (RunStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn create_starts_running() {
        let (store, _dir) = store();
        let run = store.create("t1", "p1").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        let loaded = store.get(&run.id).unwrap().unwrap();
        assert_eq!(loaded.thread_id, "t1");
        assert_eq!(loaded.project_id, "p1");
    }

    #[test]
    fn finish_transitions_once() {
        let (store, _dir) = store();
        let run = store.create("t1", "p1").unwrap();

        assert!(store
            .finish(&run.id, RunStatus::Stopped, None, None)
            .unwrap());
        // Terminal states are absorbing.
        assert!(!store
            .finish(&run.id, RunStatus::Completed, None, None)
            .unwrap());

        let loaded = store.get(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Stopped);
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn finish_records_error_and_responses() {
        let (store, _dir) = store();
        let run = store.create("t1", "p1").unwrap();
        store
            .finish(
                &run.id,
                RunStatus::Failed,
                Some("boom".into()),
                Some(vec![serde_json::json!({"type": "error"})]),
            )
            .unwrap();

        let loaded = store.get(&run.id).unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert_eq!(loaded.responses.len(), 1);
    }

    #[test]
    fn project_scan_finds_running_run() {
        let (store, _dir) = store();
        let a = store.create("t1", "p1").unwrap();
        store.create("t2", "p2").unwrap();

        assert_eq!(store.running_in_project("p1").unwrap(), Some(a.id.clone()));
        store.finish(&a.id, RunStatus::Completed, None, None).unwrap();
        assert_eq!(store.running_in_project("p1").unwrap(), None);
    }

    #[test]
    fn list_running_for_recovery() {
        let (store, _dir) = store();
        store.create("t1", "p1").unwrap();
        let done = store.create("t2", "p1").unwrap();
        store.finish(&done.id, RunStatus::Completed, None, None).unwrap();

        assert_eq!(store.list_running().unwrap().len(), 1);
    }
}
