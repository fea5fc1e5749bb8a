//! Built-in tools.

mod message;

pub use message::MessageTool;
