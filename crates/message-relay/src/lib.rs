//! Message relay.
//!
//! The [`Relayer`] drains the outboxes of every registered channel, sends
//! each message through its channel and removes it. Messages whose delivery
//! fails are moved to the dead-letter store and retried on later batches.
//! [`start_batch_run`] repeats the relay on a fixed interval.

pub mod batch;
pub mod channel;
pub mod error;
pub mod relayer;

pub use batch::{BatchJob, BatchRunHandle, start_batch_run};
pub use channel::{ChannelRegistry, RelayChannel, SendFn};
pub use error::{RelayError, Result};
pub use relayer::{RelaySummary, Relayer};
