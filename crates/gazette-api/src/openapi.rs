//! OpenAPI documentation
//!
//! The OpenAPI 3 document is generated from the handler annotations; a
//! Swagger UI page renders it.

use axum::{
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use utoipa::OpenApi;

use crate::handlers::{campaigns, health, queue, tracking, ErrorResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gazette API",
        description = "Newsletter campaign delivery and engagement tracking",
        license(name = "Apache-2.0")
    ),
    paths(
        health::health,
        health::liveness,
        health::readiness,
        health::metrics,
        campaigns::list_campaigns,
        campaigns::create_campaign,
        campaigns::get_campaign,
        campaigns::start_campaign,
        campaigns::schedule_campaign,
        campaigns::cancel_campaign,
        campaigns::get_campaign_stats,
        queue::queue_status,
        tracking::track_open,
        tracking::track_click,
        tracking::unsubscribe,
    ),
    components(schemas(
        ErrorResponse,
        health::HealthResponse,
        campaigns::CampaignResponse,
        campaigns::CampaignListResponse,
        campaigns::CreateCampaignRequest,
        campaigns::RecipientRequest,
        campaigns::StartCampaignRequest,
        campaigns::ScheduleCampaignRequest,
        campaigns::CampaignStatsResponse,
        campaigns::CampaignSummaryResponse,
        campaigns::DeliveryStatsResponse,
        campaigns::RatesResponse,
        campaigns::ActivityResponse,
        queue::QueueStatusResponse,
    )),
    tags(
        (name = "health", description = "Health checks and metrics"),
        (name = "campaigns", description = "Campaign lifecycle and statistics"),
        (name = "queue", description = "Batch sender queue"),
        (name = "tracking", description = "Open, click and unsubscribe tracking")
    )
)]
pub struct ApiDoc;

/// Create OpenAPI routes
pub fn create_openapi_routes() -> Router {
    Router::new()
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/swagger-ui", get(swagger_ui))
}

/// OpenAPI JSON document endpoint
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Swagger UI HTML endpoint
async fn swagger_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Gazette API Documentation</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui.css" />
    <style>
        body { margin: 0; padding: 0; }
        .swagger-ui .topbar { display: none; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIBundle.SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>"#;
