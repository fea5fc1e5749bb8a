use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StellwerkError;
use crate::message::ControlFrame;

/// Publishes control frames to all subscribers via PUB/SUB fan-out.
#[async_trait]
pub trait ControlPublisher: Send + Sync {
    /// Publish a frame. Subscribers filter by the frame's channel.
    async fn publish(&self, frame: ControlFrame) -> Result<(), StellwerkError>;
}

/// Blanket implementation so `Arc<dyn ControlPublisher>` can be used directly.
#[async_trait]
impl<T: ControlPublisher + ?Sized> ControlPublisher for Arc<T> {
    async fn publish(&self, frame: ControlFrame) -> Result<(), StellwerkError> {
        (**self).publish(frame).await
    }
}

/// Subscribes to control frames matching channel prefixes.
#[async_trait]
pub trait ControlSubscriber: Send + Sync {
    /// Subscribe to frames whose channel matches the given prefix.
    async fn subscribe(&self, channel_prefix: &str) -> Result<(), StellwerkError>;

    /// Receive the next frame. Blocks until one is available.
    async fn recv(&self) -> Result<ControlFrame, StellwerkError>;
}

#[async_trait]
impl<T: ControlSubscriber + ?Sized> ControlSubscriber for Arc<T> {
    async fn subscribe(&self, channel_prefix: &str) -> Result<(), StellwerkError> {
        (**self).subscribe(channel_prefix).await
    }

    async fn recv(&self) -> Result<ControlFrame, StellwerkError> {
        (**self).recv().await
    }
}
