//! Shared identifier types for the saga orchestration engine.

mod types;

pub use types::{ChannelName, MessageId, SessionId};
