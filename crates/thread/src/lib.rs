pub mod store;

pub use store::{MessageFilter, Thread, ThreadStore, ThreadSummary};
