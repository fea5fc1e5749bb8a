use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub bus: BusConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            storage: StorageConfig::from_env(),
            bus: BusConfig::from_env(),
            auth: AuthConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage:  data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  bus:      mode={}, presence_ttl={}s",
            self.bus.mode,
            self.bus.presence_ttl_secs
        );
        tracing::info!(
            "  auth:     api_token={}",
            if self.auth.api_token.is_some() { "set" } else { "(open)" }
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u16("PORT", 3100),
            cors_origin: env_or("CORS_ORIGIN", "*"),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
        }
    }
}

// ── Control bus ───────────────────────────────────────────────

/// Control-plane bus settings.
///
/// `mode` selects the bus implementation: `local` (in-process broadcast,
/// single-instance deployments) or `zmq` (cross-instance PUB/SUB through a
/// forwarder). The endpoints name the forwarder's frontend (publishers
/// connect here) and backend (subscribers connect here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub mode: String,
    pub publish_endpoint: String,
    pub subscribe_endpoint: String,
    pub presence_ttl_secs: u64,
}

impl BusConfig {
    fn from_env() -> Self {
        Self {
            mode: env_or("BUS_MODE", "local"),
            publish_endpoint: env_or("BUS_PUBLISH_ENDPOINT", "tcp://127.0.0.1:5560"),
            subscribe_endpoint: env_or("BUS_SUBSCRIBE_ENDPOINT", "tcp://127.0.0.1:5561"),
            presence_ttl_secs: env_u64("PRESENCE_TTL_SECS", 300),
        }
    }
}

// ── Auth ──────────────────────────────────────────────────────

/// Thin shared-token gate. The real authentication layer sits in front of
/// this service; an unset token leaves the API open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_token: Option<String>,
}

impl AuthConfig {
    fn from_env() -> Self {
        Self {
            api_token: env_opt("API_TOKEN"),
        }
    }
}
