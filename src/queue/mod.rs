//! Offline write queue.
//!
//! Mutating requests that cannot reach the network are persisted in order
//! and replayed later, at least once, by the sync orchestrator.

mod store;
mod sync;
mod trigger;

pub use store::{NewOperation, QueueOperation, WriteQueue};
pub use sync::{DrainReport, SyncOrchestrator};
pub use trigger::{
  spawn_background_replay, BackgroundReplay, Callback, ChannelTrigger, PollingTrigger,
  ReplayTrigger,
};
