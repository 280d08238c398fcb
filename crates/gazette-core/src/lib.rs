//! Gazette Core - Campaign delivery and engagement tracking
//!
//! This crate provides the batch sender that drains campaign queues at a
//! bounded rate, the signed tracking links and the recorder behind them,
//! campaign statistics and the queue status reporter.

pub mod campaign;
pub mod metrics;
pub mod queue;
pub mod stats;
pub mod tracking;

pub use campaign::{
    BatchSender, CampaignError, CampaignManager, DrainOutcome, LogTransport, MailTransport,
    RatePolicy, SmtpMailTransport, TemplateRenderer,
};
pub use metrics::Metrics;
pub use queue::{QueueCounters, QueueStatus, QueueStatusReporter};
pub use stats::{CampaignStats, Performance, StatsAggregator};
pub use tracking::{TrackingCodec, TrackingQuery, TrackingRecorder, UnsubscribeResult};
