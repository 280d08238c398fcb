//! Shared application state

use gazette_common::config::ApiConfig;
use gazette_core::{
    CampaignManager, Metrics, QueueStatusReporter, StatsAggregator, TrackingRecorder,
};
use gazette_storage::DatabasePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CampaignManager>,
    pub recorder: TrackingRecorder,
    pub reporter: QueueStatusReporter,
    pub stats: StatsAggregator,
    pub metrics: Metrics,
    pub api: ApiConfig,
    /// Present when running against PostgreSQL; readiness pings it
    pub db_pool: Option<DatabasePool>,
}
