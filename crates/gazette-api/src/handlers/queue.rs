//! Queue status handler

use axum::{extract::State, Json};
use gazette_core::QueueStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::state::AppState;

/// Queue progress across every in-flight campaign
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueStatusResponse {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs claimed per batch
    pub batch_size: usize,
    /// Delay between two sends, in milliseconds
    pub send_delay_ms: u64,
}

impl From<QueueStatus> for QueueStatusResponse {
    fn from(s: QueueStatus) -> Self {
        Self {
            pending: s.pending,
            processing: s.processing,
            completed: s.completed,
            failed: s.failed,
            batch_size: s.batch_size,
            send_delay_ms: s.send_delay_ms,
        }
    }
}

/// Queue status
#[utoipa::path(
    get,
    path = "/api/v1/queue/status",
    tag = "queue",
    responses(
        (status = 200, description = "Job counters and pacing constants", body = QueueStatusResponse)
    )
)]
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatusResponse> {
    Json(QueueStatusResponse::from(state.reporter.status()))
}
