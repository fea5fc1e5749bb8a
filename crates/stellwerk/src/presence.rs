//! TTL-based presence registry.
//!
//! Each supervising instance advertises `active_run:{instance_id}:{run_id}`
//! while a run is alive. Keys expire unless refreshed, so a crashed
//! instance's claims disappear on their own.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Process-wide key-value presence store with TTL.
pub struct PresenceRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl PresenceRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Presence key for an (instance, run) pair.
    pub fn key(instance_id: &str, run_id: &str) -> String {
        format!("active_run:{instance_id}:{run_id}")
    }

    /// Register a run as supervised by an instance, with a fresh TTL.
    pub fn register(&self, instance_id: &str, run_id: &str) {
        let key = Self::key(instance_id, run_id);
        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "registering presence");
        self.entries
            .lock()
            .unwrap()
            .insert(key, Instant::now() + self.ttl);
    }

    /// Extend the TTL of an existing (or re-created) registration.
    pub fn refresh(&self, instance_id: &str, run_id: &str) {
        self.register(instance_id, run_id);
    }

    /// Remove a registration.
    pub fn remove(&self, instance_id: &str, run_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .remove(&Self::key(instance_id, run_id));
    }

    /// Instances currently advertising supervision of a run.
    /// Expired keys are reaped on the way.
    pub fn instances_for_run(&self, run_id: &str) -> Vec<String> {
        let suffix = format!(":{run_id}");
        self.live_keys()
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix("active_run:")?;
                let instance = rest.strip_suffix(suffix.as_str())?;
                (!instance.is_empty()).then(|| instance.to_string())
            })
            .collect()
    }

    /// Runs currently advertised by an instance (shutdown sweep).
    pub fn runs_for_instance(&self, instance_id: &str) -> Vec<String> {
        let prefix = format!("active_run:{instance_id}:");
        self.live_keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()).map(String::from))
            .collect()
    }

    fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, expires| *expires > now);
        entries.keys().cloned().collect()
    }
}
