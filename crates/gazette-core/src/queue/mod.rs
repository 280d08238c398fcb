//! Queue progress reporting

mod status;

pub use status::{QueueCounters, QueueStatus, QueueStatusReporter};
