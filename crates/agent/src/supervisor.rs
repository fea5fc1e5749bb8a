//! Background supervisor for one agent run.
//!
//! Subscribes to the run's control channels, drives the agent step loop
//! while appending events to the in-memory log, and writes the terminal
//! status when the run ends. A concurrent watcher turns STOP frames into a
//! flag the step loop observes between events; events arriving after the
//! flag is set are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dirigent_stellwerk::{
    global_channel, instance_channel, ControlFrame, ControlSignal, ControlSubscriber,
};

use crate::controller::RunController;
use crate::run_log::RunLog;
use crate::run_store::{AgentRun, RunStatus};

const SUBSCRIBE_ATTEMPTS: u32 = 3;
const STOP_POLL_TIMEOUT: Duration = Duration::from_millis(500);
const PRESENCE_REFRESH_EVERY: u64 = 100;

pub(crate) async fn supervise(controller: Arc<RunController>, run: AgentRun, log: Arc<RunLog>) {
    let instance_id = controller.instance_id().to_string();
    info!(run = %run.id, instance = %instance_id, "starting background agent run");

    let subscriber = open_control_subscription(&controller, &run.id, &instance_id).await;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let watcher = subscriber.map(|subscriber| {
        spawn_stop_watcher(subscriber, stop_flag.clone(), run.id.clone(), instance_id.clone())
    });

    let outcome = drive_step_loop(&controller, &run, &log, &stop_flag).await;

    match outcome {
        Ok(()) if !stop_flag.load(Ordering::SeqCst) => {
            log.append(serde_json::json!({
                "type": "status",
                "status": "completed",
                "message": "Agent run completed successfully"
            }))
            .await;

            let responses = log.snapshot().await;
            if let Err(e) = controller
                .finish_with_retry(&run.id, RunStatus::Completed, None, Some(responses))
                .await
            {
                error!(run = %run.id, error = %e, "failed to persist run completion");
            }
            publish_outcome(&controller, &run.id, &instance_id, ControlSignal::EndStream).await;
            let event_count = log.len().await;
            info!(run = %run.id, events = event_count, "agent run completed");
        }
        Ok(()) => {
            // Stopped by signal. The stopping side normally persists the
            // status first; this write is a no-op in that case.
            if let Err(e) = controller
                .finish_with_retry(&run.id, RunStatus::Stopped, None, Some(log.snapshot().await))
                .await
            {
                error!(run = %run.id, error = %e, "failed to persist stopped status");
            }
            info!(run = %run.id, "agent run stopped by signal");
        }
        Err(message) => {
            error!(run = %run.id, error = %message, "agent run failed");
            log.append(serde_json::json!({
                "type": "status",
                "status": "error",
                "message": message
            }))
            .await;

            let responses = log.snapshot().await;
            if let Err(e) = controller
                .finish_with_retry(&run.id, RunStatus::Failed, Some(message), Some(responses))
                .await
            {
                error!(run = %run.id, error = %e, "failed to persist run failure");
            }
            publish_outcome(&controller, &run.id, &instance_id, ControlSignal::Error).await;
        }
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    controller.presence().remove(&instance_id, &run.id);
    controller.deactivate(&run.id);
    debug!(run = %run.id, "supervisor finished");
}

/// Drive the agent step loop, appending each event to the in-memory log.
/// The stop flag is checked between events; late events are discarded.
async fn drive_step_loop(
    controller: &Arc<RunController>,
    run: &AgentRun,
    log: &Arc<RunLog>,
    stop_flag: &Arc<AtomicBool>,
) -> Result<(), String> {
    let mut stream = controller
        .source()
        .run(&run.thread_id)
        .await
        .map_err(|e| e.to_string())?;

    let mut total: u64 = 0;
    while let Some(event) = stream.next().await {
        if stop_flag.load(Ordering::SeqCst) {
            info!(run = %run.id, "stop signal observed, exiting step loop");
            break;
        }
        match serde_json::to_value(&event) {
            Ok(value) => log.append(value).await,
            Err(e) => warn!(run = %run.id, error = %e, "failed to serialize event"),
        }
        total += 1;
        if total % PRESENCE_REFRESH_EVERY == 0 {
            controller.presence().refresh(controller.instance_id(), &run.id);
        }
    }
    Ok(())
}

/// Subscribe to the instance-specific and global control channels with
/// retry and backoff. Failure of the global channel is tolerated; failure
/// of the instance channel disables the watcher entirely.
async fn open_control_subscription(
    controller: &Arc<RunController>,
    run_id: &str,
    instance_id: &str,
) -> Option<Box<dyn ControlSubscriber>> {
    let subscriber = match controller.bus().subscriber().await {
        Ok(subscriber) => subscriber,
        Err(e) => {
            error!(run = %run_id, error = %e, "failed to open control subscription; stop signals disabled");
            return None;
        }
    };

    let instance = instance_channel(run_id, instance_id);
    if !subscribe_with_retry(subscriber.as_ref(), &instance).await {
        error!(run = %run_id, channel = %instance, "failed to subscribe to instance control channel");
        return None;
    }

    let global = global_channel(run_id);
    if !subscribe_with_retry(subscriber.as_ref(), &global).await {
        // Local channel still works, keep going.
        warn!(run = %run_id, channel = %global, "continuing with instance channel only");
    }

    Some(subscriber)
}

async fn subscribe_with_retry(subscriber: &dyn ControlSubscriber, channel: &str) -> bool {
    for attempt in 1..=SUBSCRIBE_ATTEMPTS {
        match subscriber.subscribe(channel).await {
            Ok(()) => {
                debug!(channel = %channel, "subscribed to control channel");
                return true;
            }
            Err(e) if attempt < SUBSCRIBE_ATTEMPTS => {
                let wait = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                warn!(
                    channel = %channel,
                    attempt,
                    error = %e,
                    wait_ms = wait.as_millis() as u64,
                    "control channel subscribe failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "control channel subscribe failed after retries");
            }
        }
    }
    false
}

/// Poll the control subscription until a STOP frame arrives or the task is
/// aborted. Each poll is bounded so abort latency stays low even on a
/// quiet bus.
fn spawn_stop_watcher(
    subscriber: Box<dyn ControlSubscriber>,
    stop_flag: Arc<AtomicBool>,
    run_id: String,
    instance_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match tokio::time::timeout(STOP_POLL_TIMEOUT, subscriber.recv()).await {
                Ok(Ok(frame)) => {
                    if frame.signal == ControlSignal::Stop {
                        info!(run = %run_id, instance = %instance_id, origin = %frame.origin, "received stop signal");
                        stop_flag.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!(run = %run_id, error = %e, "error polling control channel");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(_) => {} // poll timeout, loop again
            }
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
        }
    })
}

async fn publish_outcome(
    controller: &Arc<RunController>,
    run_id: &str,
    instance_id: &str,
    signal: ControlSignal,
) {
    let publisher = controller.bus().publisher();
    for channel in [
        instance_channel(run_id, instance_id),
        global_channel(run_id),
    ] {
        if let Err(e) = publisher
            .publish(ControlFrame::new(channel.clone(), signal, instance_id))
            .await
        {
            warn!(run = %run_id, channel = %channel, error = %e, "failed to publish run outcome signal");
        }
    }
}
