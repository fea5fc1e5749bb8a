//! Bus handle: one shared publisher plus per-consumer subscribers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StellwerkError;
use crate::local::LocalBus;
use crate::pubsub::{ZmqControlPublisher, ZmqControlSubscriber};
use crate::traits::{ControlPublisher, ControlSubscriber};
use crate::transport::Transport;

/// A control bus a supervisor can publish on and open fresh subscriptions
/// against. Implemented by the in-process bus and the ZeroMQ bus.
#[async_trait]
pub trait ControlBus: Send + Sync {
    fn publisher(&self) -> Arc<dyn ControlPublisher>;

    /// Open a new, independent subscription handle.
    async fn subscriber(&self) -> Result<Box<dyn ControlSubscriber>, StellwerkError>;
}

#[async_trait]
impl ControlBus for LocalBus {
    fn publisher(&self) -> Arc<dyn ControlPublisher> {
        Arc::new(self.clone())
    }

    async fn subscriber(&self) -> Result<Box<dyn ControlSubscriber>, StellwerkError> {
        Ok(Box::new(LocalBus::subscriber(self)))
    }
}

/// Cross-instance bus over ZeroMQ PUB/SUB through a forwarder.
pub struct ZmqBus {
    publisher: Arc<ZmqControlPublisher>,
    subscribe_transport: Transport,
}

impl ZmqBus {
    /// Connect the shared publisher; subscribers are opened lazily.
    pub async fn connect(
        publish: &Transport,
        subscribe: &Transport,
    ) -> Result<Self, StellwerkError> {
        Ok(Self {
            publisher: Arc::new(ZmqControlPublisher::connect(publish).await?),
            subscribe_transport: subscribe.clone(),
        })
    }
}

#[async_trait]
impl ControlBus for ZmqBus {
    fn publisher(&self) -> Arc<dyn ControlPublisher> {
        self.publisher.clone()
    }

    async fn subscriber(&self) -> Result<Box<dyn ControlSubscriber>, StellwerkError> {
        Ok(Box::new(
            ZmqControlSubscriber::connect(&self.subscribe_transport).await?,
        ))
    }
}
