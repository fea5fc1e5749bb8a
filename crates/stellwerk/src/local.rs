//! In-process control bus for single-instance deployments and tests.
//!
//! Fan-out over a `tokio::sync::broadcast` channel with subscriber-side
//! prefix filtering, mirroring the ZeroMQ bus semantics without sockets.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StellwerkError;
use crate::message::ControlFrame;
use crate::traits::{ControlPublisher, ControlSubscriber};

const BUS_CAPACITY: usize = 256;

/// Process-local control bus. Cloneable; all clones share one channel.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<ControlFrame>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Create a subscriber attached to this bus.
    pub fn subscriber(&self) -> LocalSubscriber {
        LocalSubscriber {
            rx: tokio::sync::Mutex::new(self.tx.subscribe()),
            prefixes: Mutex::new(Vec::new()),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPublisher for LocalBus {
    async fn publish(&self, frame: ControlFrame) -> Result<(), StellwerkError> {
        debug!(channel = %frame.channel, signal = %frame.signal, "publishing on local bus");
        // No receivers is not an error for PUB/SUB semantics.
        let _ = self.tx.send(frame);
        Ok(())
    }
}

/// Subscriber handle on a [`LocalBus`].
pub struct LocalSubscriber {
    rx: tokio::sync::Mutex<broadcast::Receiver<ControlFrame>>,
    prefixes: Mutex<Vec<String>>,
}

#[async_trait]
impl ControlSubscriber for LocalSubscriber {
    async fn subscribe(&self, channel_prefix: &str) -> Result<(), StellwerkError> {
        self.prefixes.lock().unwrap().push(channel_prefix.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<ControlFrame, StellwerkError> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let matches = {
                        let prefixes = self.prefixes.lock().unwrap();
                        prefixes.iter().any(|p| frame.channel.starts_with(p.as_str()))
                    };
                    if matches {
                        return Ok(frame);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "local bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StellwerkError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{global_channel, ControlSignal};

    #[tokio::test]
    async fn publish_reaches_matching_subscriber() {
        let bus = LocalBus::new();
        let subscriber = bus.subscriber();
        subscriber.subscribe("agent_run:r1:").await.unwrap();

        bus.publish(ControlFrame::new(global_channel("r1"), ControlSignal::Stop, "i"))
            .await
            .unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.signal, ControlSignal::Stop);
    }

    #[tokio::test]
    async fn non_matching_channels_are_filtered() {
        let bus = LocalBus::new();
        let subscriber = bus.subscriber();
        subscriber.subscribe("agent_run:r1:").await.unwrap();

        bus.publish(ControlFrame::new(global_channel("other"), ControlSignal::Stop, "i"))
            .await
            .unwrap();
        bus.publish(ControlFrame::new(global_channel("r1"), ControlSignal::EndStream, "i"))
            .await
            .unwrap();

        let frame = subscriber.recv().await.unwrap();
        assert_eq!(frame.channel, "agent_run:r1:control");
        assert_eq!(frame.signal, ControlSignal::EndStream);
    }

    #[tokio::test]
    async fn fan_out_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let sub1 = bus.subscriber();
        let sub2 = bus.subscriber();
        sub1.subscribe("agent_run:").await.unwrap();
        sub2.subscribe("agent_run:").await.unwrap();

        bus.publish(ControlFrame::new(global_channel("r"), ControlSignal::Error, "i"))
            .await
            .unwrap();

        assert_eq!(sub1.recv().await.unwrap().signal, ControlSignal::Error);
        assert_eq!(sub2.recv().await.unwrap().signal, ControlSignal::Error);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        bus.publish(ControlFrame::new("c", ControlSignal::Stop, "i"))
            .await
            .unwrap();
    }
}
