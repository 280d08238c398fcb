//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use gazette_core::stats::{ActivityItem, CampaignStats};
use gazette_storage::models::{Campaign, CreateCampaign, Recipient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{campaign_error, storage_error, ApiError, ErrorResponse};
use crate::state::AppState;

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCampaignsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    /// draft, scheduled, sending, sent, cancelled or error
    pub status: String,
    pub total_recipients: i32,
    pub total_sent: i32,
    pub total_opened: i32,
    pub total_clicked: i32,
    pub total_failed: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        Self {
            id: c.id,
            title: c.title,
            subject: c.subject,
            from_address: c.from_address,
            from_name: c.from_name,
            status: c.status,
            total_recipients: c.total_recipients,
            total_sent: c.total_sent,
            total_opened: c.total_opened,
            total_clicked: c.total_clicked,
            total_failed: c.total_failed,
            scheduled_at: c.scheduled_at,
            started_at: c.started_at,
            sent_at: c.sent_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Request body for creating a campaign
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    pub title: String,
    pub subject: String,
    /// HTML content; supports {{email}}, {{name}}, {{first_name}}, {{last_name}}, {{unsubscribe_url}}
    pub html_body: String,
    pub text_body: Option<String>,
    /// Falls back to the configured sender when absent
    pub from_address: Option<String>,
    pub from_name: Option<String>,
}

/// One resolved recipient
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecipientRequest {
    pub subscriber_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub unsubscribed: bool,
}

impl From<RecipientRequest> for Recipient {
    fn from(r: RecipientRequest) -> Self {
        Recipient {
            subscriber_id: r.subscriber_id,
            email: r.email,
            name: r.name,
            unsubscribed: r.unsubscribed,
        }
    }
}

/// Request body for starting a campaign
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartCampaignRequest {
    pub recipients: Vec<RecipientRequest>,
}

/// Request body for scheduling a campaign
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduleCampaignRequest {
    pub scheduled_at: DateTime<Utc>,
    pub recipients: Vec<RecipientRequest>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CampaignSummaryResponse {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RatesResponse {
    pub delivery: u32,
    pub open: u32,
    pub click: u32,
    pub failure: u32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryStatsResponse {
    pub sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
    pub failed: i64,
    pub unsubscribed: i64,
    pub rates: RatesResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityResponse {
    pub email: String,
    pub name: Option<String>,
    /// opened or clicked
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ActivityItem> for ActivityResponse {
    fn from(item: ActivityItem) -> Self {
        let action = match item.action {
            gazette_storage::models::ActivityAction::Opened => "opened",
            gazette_storage::models::ActivityAction::Clicked => "clicked",
        };
        Self {
            email: item.email,
            name: item.name,
            action: action.to_string(),
            timestamp: item.timestamp,
        }
    }
}

/// Campaign statistics response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CampaignStatsResponse {
    pub campaign: CampaignSummaryResponse,
    pub stats: DeliveryStatsResponse,
    /// Excellente, Bonne or À améliorer
    pub performance: String,
    pub recent_activity: Vec<ActivityResponse>,
}

impl From<CampaignStats> for CampaignStatsResponse {
    fn from(s: CampaignStats) -> Self {
        Self {
            campaign: CampaignSummaryResponse {
                id: s.campaign.id,
                title: s.campaign.title,
                status: s.campaign.status,
                sent_at: s.campaign.sent_at,
            },
            stats: DeliveryStatsResponse {
                sent: s.stats.sent,
                delivered: s.stats.delivered,
                opened: s.stats.opened,
                clicked: s.stats.clicked,
                failed: s.stats.failed,
                unsubscribed: s.stats.unsubscribed,
                rates: RatesResponse {
                    delivery: s.stats.rates.delivery,
                    open: s.stats.rates.open,
                    click: s.stats.rates.click,
                    failure: s.stats.rates.failure,
                },
            },
            performance: s.performance.label().to_string(),
            recent_activity: s
                .recent_activity
                .into_iter()
                .map(ActivityResponse::from)
                .collect(),
        }
    }
}

/// List campaigns
#[utoipa::path(
    get,
    path = "/api/v1/campaigns",
    tag = "campaigns",
    params(ListCampaignsQuery),
    responses(
        (status = 200, description = "Campaigns, newest first", body = CampaignListResponse)
    )
)]
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignListResponse>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);

    let campaigns = state
        .manager
        .list_campaigns(limit, offset)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignListResponse {
        data: campaigns.into_iter().map(CampaignResponse::from).collect(),
        limit,
        offset,
    }))
}

/// Create a draft campaign
#[utoipa::path(
    post,
    path = "/api/v1/campaigns",
    tag = "campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 201, description = "Campaign created", body = CampaignResponse),
        (status = 422, description = "Invalid campaign", body = ErrorResponse)
    )
)]
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let campaign = state
        .manager
        .create_campaign(CreateCampaign {
            title: input.title,
            subject: input.subject,
            html_body: input.html_body,
            text_body: input.text_body,
            from_address: input.from_address,
            from_name: input.from_name,
        })
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// Get a campaign by ID
#[utoipa::path(
    get,
    path = "/api/v1/campaigns/{id}",
    tag = "campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign", body = CampaignResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse)
    )
)]
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .manager
        .get_campaign(campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Start sending a campaign
#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/start",
    tag = "campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    request_body = StartCampaignRequest,
    responses(
        (status = 202, description = "Recipients enqueued, campaign is sending", body = CampaignResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
        (status = 409, description = "Campaign is not draft or scheduled", body = ErrorResponse),
        (status = 422, description = "No deliverable recipient, invalid address or schedule not reached", body = ErrorResponse)
    )
)]
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
    Json(input): Json<StartCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let recipients = input.recipients.into_iter().map(Recipient::from).collect();

    let campaign = state
        .manager
        .start_campaign(campaign_id, recipients)
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::ACCEPTED, Json(CampaignResponse::from(campaign))))
}

/// Schedule a draft campaign
#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/schedule",
    tag = "campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    request_body = ScheduleCampaignRequest,
    responses(
        (status = 200, description = "Campaign scheduled", body = CampaignResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
        (status = 409, description = "Campaign is not a draft", body = ErrorResponse),
        (status = 422, description = "No deliverable recipient", body = ErrorResponse)
    )
)]
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
    Json(input): Json<ScheduleCampaignRequest>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let recipients = input.recipients.into_iter().map(Recipient::from).collect();

    let campaign = state
        .manager
        .schedule_campaign(campaign_id, input.scheduled_at, recipients)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Cancel a scheduled or sending campaign
#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/cancel",
    tag = "campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign cancelled", body = CampaignResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
        (status = 409, description = "Campaign cannot be cancelled", body = ErrorResponse)
    )
)]
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .manager
        .cancel_campaign(campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Campaign statistics
#[utoipa::path(
    get,
    path = "/api/v1/campaigns/{id}/stats",
    tag = "campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Counts, rates and recent activity", body = CampaignStatsResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse)
    )
)]
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignStatsResponse>, ApiError> {
    let stats = state
        .stats
        .campaign_stats(campaign_id)
        .await
        .map_err(storage_error)?;

    Ok(Json(CampaignStatsResponse::from(stats)))
}
