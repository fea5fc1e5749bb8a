use thiserror::Error;

/// Errors that can occur in the stellwerk control plane.
#[derive(Debug, Error)]
pub enum StellwerkError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("bus channel closed")]
    ChannelClosed,
}
