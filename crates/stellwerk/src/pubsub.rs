//! ZeroMQ PUB/SUB control channels for cross-instance coordination.
//!
//! Frames travel as two-frame ZMQ messages: the channel string (used by SUB
//! sockets for prefix filtering) followed by the MessagePack-encoded
//! [`ControlFrame`]. Publishers and subscribers connect to a forwarder's
//! frontend/backend endpoints; for a broker-less setup a publisher can bind
//! directly and subscribers connect to it.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::StellwerkError;
use crate::message::ControlFrame;
use crate::traits::{ControlPublisher, ControlSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher for control frames.
pub struct ZmqControlPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqControlPublisher {
    /// Connect to a forwarder's frontend endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, StellwerkError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting control PUB socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Bind directly (broker-less PUB/SUB: publisher binds, subscribers connect).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, StellwerkError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding control PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl ControlPublisher for ZmqControlPublisher {
    /// Publish a frame as a two-frame ZMQ message: [channel, frame].
    async fn publish(&self, frame: ControlFrame) -> Result<(), StellwerkError> {
        let channel = frame.channel.clone();
        let frame_bytes = frame.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(channel.as_str());
        zmq_msg.push_back(frame_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(channel = %channel, signal = %frame.signal, "published control frame");
        Ok(())
    }
}

/// ZeroMQ SUB socket subscriber for control frames.
pub struct ZmqControlSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqControlSubscriber {
    /// Connect to a forwarder's backend endpoint (or a bound publisher).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, StellwerkError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting control SUB socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl ControlSubscriber for ZmqControlSubscriber {
    /// Subscribe to frames whose channel starts with the given prefix.
    /// An empty string subscribes to all channels.
    async fn subscribe(&self, channel_prefix: &str) -> Result<(), StellwerkError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(channel_prefix).await?;
        info!(prefix = %channel_prefix, "subscribed to control channel prefix");
        Ok(())
    }

    /// Receive the next frame. Expects a two-frame message [channel, frame];
    /// a single-frame message is treated as a bare frame.
    async fn recv(&self) -> Result<ControlFrame, StellwerkError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        let frames: Vec<_> = zmq_msg.iter().collect();
        let payload = match frames.len() {
            0 => return Err(StellwerkError::Transport("empty ZMQ message".into())),
            1 => frames[0].as_ref(),
            _ => frames[1].as_ref(),
        };
        let frame = ControlFrame::from_bytes(payload)?;
        debug!(channel = %frame.channel, signal = %frame.signal, "received control frame");
        Ok(frame)
    }
}
