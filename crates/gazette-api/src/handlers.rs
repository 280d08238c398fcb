//! API request handlers

pub mod campaigns;
pub mod health;
pub mod queue;
pub mod tracking;

pub use health::*;

use axum::{http::StatusCode, Json};
use gazette_core::CampaignError;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable reason
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

impl ErrorResponse {
    pub fn new(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                message: message.into(),
            }),
        )
    }
}

impl From<CampaignError> for ErrorResponse {
    fn from(e: CampaignError) -> Self {
        ErrorResponse {
            error: e.code().to_ascii_lowercase(),
            message: e.to_string(),
        }
    }
}

/// Map a campaign manager error to its HTTP response
pub(crate) fn campaign_error(e: CampaignError) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        error!(error = %e, "Campaign operation failed");
        return ErrorResponse::new(status, "internal_error", "Internal server error");
    }

    (status, Json(ErrorResponse::from(e)))
}

/// Map a storage-level error to its HTTP response
pub(crate) fn storage_error(e: gazette_common::Error) -> ApiError {
    campaign_error(CampaignError::Storage(e))
}
