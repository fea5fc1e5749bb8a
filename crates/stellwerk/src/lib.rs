pub mod bus;
pub mod error;
pub mod local;
pub mod message;
pub mod presence;
pub mod pubsub;
pub mod traits;
pub mod transport;

pub use bus::{ControlBus, ZmqBus};
pub use error::StellwerkError;
pub use local::{LocalBus, LocalSubscriber};
pub use message::{global_channel, instance_channel, ControlFrame, ControlSignal};
pub use presence::PresenceRegistry;
pub use pubsub::{ZmqControlPublisher, ZmqControlSubscriber};
pub use traits::{ControlPublisher, ControlSubscriber};
pub use transport::Transport;
