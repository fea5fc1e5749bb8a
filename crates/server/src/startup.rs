//! Server startup: shared state initialization and crash recovery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use dirigent_agent::{ProcessorEventSource, RunController, RunStore};
use dirigent_core::Config;
use dirigent_stellwerk::{ControlBus, LocalBus, PresenceRegistry, Transport, ZmqBus};
use dirigent_thread::ThreadStore;
use dirigent_tool_runtime::{ChunkProvider, MessageTool, ProcessorConfig, ToolRegistry};

use crate::state::AppState;

/// Build `AppState`. The LM client is an external collaborator: with no
/// provider, the thread endpoints work but agent runs answer 503.
pub async fn build_app_state(
    config: Config,
    provider: Option<Arc<dyn ChunkProvider>>,
) -> anyhow::Result<Arc<AppState>> {
    let threads = Arc::new(
        ThreadStore::new(&config.storage.data_dir)
            .context("failed to initialize thread store")?,
    );

    let runs = Arc::new(
        RunStore::new(&config.storage.data_dir).context("failed to initialize run store")?,
    );

    // Crash recovery runs unconditionally: runs left `running` by a dead
    // process have no supervisor and must be failed.
    let recovered = runs
        .fail_interrupted()
        .context("crash recovery pass failed")?;
    if recovered > 0 {
        info!(recovered, "failed interrupted agent runs from previous process");
    }

    let controller = match provider {
        Some(provider) => {
            let mut registry = ToolRegistry::new();
            registry
                .register(MessageTool)
                .expect("register MessageTool");
            let registry = Arc::new(registry);

            let bus = build_bus(&config).await?;
            let presence = Arc::new(PresenceRegistry::new(Duration::from_secs(
                config.bus.presence_ttl_secs,
            )));
            let source = Arc::new(ProcessorEventSource::new(
                provider,
                registry,
                threads.clone(),
                ProcessorConfig::default(),
            ));

            Some(RunController::new(
                runs,
                threads.clone(),
                bus,
                presence,
                source,
            ))
        }
        None => {
            info!("no LM provider configured — agent runs disabled");
            None
        }
    };

    Ok(Arc::new(AppState {
        config,
        threads,
        controller,
    }))
}

async fn build_bus(config: &Config) -> anyhow::Result<Arc<dyn ControlBus>> {
    match config.bus.mode.as_str() {
        "zmq" => {
            let publish = Transport::parse(&config.bus.publish_endpoint)?;
            let subscribe = Transport::parse(&config.bus.subscribe_endpoint)?;
            let bus = ZmqBus::connect(&publish, &subscribe)
                .await
                .context("failed to connect control bus")?;
            info!(publish = %publish, subscribe = %subscribe, "ZeroMQ control bus connected");
            Ok(Arc::new(bus))
        }
        "local" => {
            info!("using in-process control bus");
            Ok(Arc::new(LocalBus::new()))
        }
        other => anyhow::bail!("unknown BUS_MODE '{other}' (expected 'local' or 'zmq')"),
    }
}
