pub mod engine;
pub mod queue;

pub use engine::{spawn_online_trigger, SyncEngine, SyncSummary};
pub use queue::QueueCounts;
