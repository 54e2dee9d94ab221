//! Frame-paced publishing and cadence statistics

mod pacer;
mod stats;

pub use pacer::{FramePacedPublisher, PublishOutcome, DEFAULT_MAX_CHUNK};
pub use stats::{CadenceTracker, TimingStats};
