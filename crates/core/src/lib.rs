pub mod config;
pub mod message;

pub use config::Config;
pub use message::*;
