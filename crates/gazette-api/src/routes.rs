//! API routes

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers::{campaigns, health, queue, tracking};
use crate::openapi::create_openapi_routes;
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let enable_swagger = state.api.enable_swagger;
    let cors = cors_layer(&state.api.cors_origins);
    let state = Arc::new(state);

    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", get(campaigns::list_campaigns))
        .route("/", post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/schedule", post(campaigns::schedule_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats));

    // Operator API
    let mut api_v1 = Router::new()
        .nest("/campaigns", campaign_routes)
        .route("/queue/status", get(queue::queue_status))
        .with_state(state.clone());
    if let Some(cors) = cors {
        api_v1 = api_v1.layer(cors);
    }

    // Public tracking surface, hit by mail clients
    let tracking_routes = Router::new()
        .route("/open", get(tracking::track_open))
        .route("/click", get(tracking::track_click))
        .route(
            "/unsubscribe",
            get(tracking::unsubscribe).post(tracking::unsubscribe),
        )
        .with_state(state.clone());

    let mut router = Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .nest("/track", tracking_routes)
        .route("/metrics", get(health::metrics).with_state(state));

    if enable_swagger {
        router = router.merge(create_openapi_routes());
    }

    router.layer(TraceLayer::new_for_http())
}

/// CORS for the operator dashboard; `None` when no origin is configured
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::Utc;
    use gazette_common::config::{ApiConfig, TrackingConfig};
    use gazette_core::campaign::RatePolicy;
    use gazette_core::{
        CampaignManager, Metrics, QueueCounters, QueueStatusReporter, StatsAggregator,
        TrackingCodec, TrackingRecorder,
    };
    use gazette_storage::repository::Repositories;
    use gazette_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::handlers::campaigns::{CampaignResponse, CampaignStatsResponse};
    use crate::handlers::queue::QueueStatusResponse;

    struct Harness {
        server: TestServer,
        codec: Arc<TrackingCodec>,
        repos: Repositories,
    }

    fn harness() -> Harness {
        let tracking = TrackingConfig {
            base_url: "https://news.annuaire.example".to_string(),
            secret: "test-secret".to_string(),
            fallback_url: Some("https://annuaire.example/".to_string()),
        };
        let codec = Arc::new(TrackingCodec::new(&tracking).unwrap());
        let repos = Repositories::memory(MemoryStore::new());
        let counters = Arc::new(QueueCounters::new());
        let metrics = Metrics::new().unwrap();

        let state = AppState {
            manager: Arc::new(CampaignManager::new(repos.clone(), counters.clone())),
            recorder: TrackingRecorder::new(
                codec.clone(),
                repos.clone(),
                counters.clone(),
                metrics.clone(),
            ),
            reporter: QueueStatusReporter::new(counters, RatePolicy::default()),
            stats: StatsAggregator::new(repos.clone()),
            metrics,
            api: ApiConfig::default(),
            db_pool: None,
        };

        Harness {
            server: TestServer::new(create_router(state)).unwrap(),
            codec,
            repos,
        }
    }

    fn recipients(n: usize) -> Value {
        let list: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "subscriber_id": Uuid::new_v4(),
                    "email": format!("commerce{}@centre-ville.example", i),
                    "name": format!("Commerce {}", i),
                })
            })
            .collect();
        json!({ "recipients": list })
    }

    async fn create(h: &Harness) -> CampaignResponse {
        let response = h
            .server
            .post("/api/v1/campaigns")
            .json(&json!({
                "title": "Braderie d'automne",
                "subject": "La braderie revient",
                "html_body": "<body><a href=\"https://braderie.example\">Plan</a></body>",
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<CampaignResponse>()
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let h = harness();
        h.server.get("/health").await.assert_status_ok();
        h.server.get("/health/live").await.assert_status_ok();
        h.server.get("/health/ready").await.assert_status_ok();

        let metrics = h.server.get("/metrics").await;
        metrics.assert_status_ok();
        assert!(metrics.text().contains("gazette_emails_sent_total"));
    }

    #[tokio::test]
    async fn test_start_campaign_lifecycle() {
        let h = harness();
        let campaign = create(&h).await;
        assert_eq!(campaign.status, "draft");

        let path = format!("/api/v1/campaigns/{}/start", campaign.id);
        let response = h.server.post(&path).json(&recipients(3)).await;
        response.assert_status(StatusCode::ACCEPTED);
        let started = response.json::<CampaignResponse>();
        assert_eq!(started.status, "sending");
        assert_eq!(started.total_recipients, 3);

        let queue = h.server.get("/api/v1/queue/status").await;
        let status = queue.json::<QueueStatusResponse>();
        assert_eq!(status.pending, 3);
        assert_eq!(status.batch_size, 10);
        assert_eq!(status.send_delay_ms, 1000);

        // already sending
        let again = h.server.post(&path).json(&recipients(1)).await;
        again.assert_status(StatusCode::CONFLICT);
        assert_eq!(again.json::<Value>()["error"], "invalid_state");

        let cancel = format!("/api/v1/campaigns/{}/cancel", campaign.id);
        let cancelled = h.server.post(&cancel).await;
        cancelled.assert_status_ok();
        assert_eq!(cancelled.json::<CampaignResponse>().status, "cancelled");
        h.server.post(&cancel).await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_start_rejections() {
        let h = harness();
        let campaign = create(&h).await;
        let path = format!("/api/v1/campaigns/{}/start", campaign.id);

        let empty = h.server.post(&path).json(&json!({ "recipients": [] })).await;
        empty.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(empty.json::<Value>()["error"], "empty_recipient_list");

        let unknown = format!("/api/v1/campaigns/{}/start", Uuid::new_v4());
        h.server
            .post(&unknown)
            .json(&recipients(1))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let draft_cancel = format!("/api/v1/campaigns/{}/cancel", campaign.id);
        h.server
            .post(&draft_cancel)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let h = harness();
        h.server
            .get(&format!("/api/v1/campaigns/{}/stats", Uuid::new_v4()))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let campaign = create(&h).await;
        let response = h
            .server
            .get(&format!("/api/v1/campaigns/{}/stats", campaign.id))
            .await;
        response.assert_status_ok();
        let stats = response.json::<CampaignStatsResponse>();
        assert_eq!(stats.campaign.status, "draft");
        assert_eq!(stats.stats.rates.open, 0);
        assert_eq!(stats.performance, "À améliorer");
    }

    #[tokio::test]
    async fn test_open_pixel_always_served() {
        let h = harness();
        let response = h
            .server
            .get("/track/open")
            .add_query_param("c", "not-a-uuid")
            .add_query_param("s", "x")
            .add_query_param("sig", "00")
            .await;

        response.assert_status_ok();
        assert_eq!(response.header("content-type"), "image/gif");
        assert!(response
            .header("cache-control")
            .to_str()
            .unwrap()
            .contains("no-cache"));
        assert_eq!(response.as_bytes().len(), 43);
    }

    #[tokio::test]
    async fn test_open_recorded_once_through_pixel() {
        let h = harness();
        let campaign = create(&h).await;
        let subscriber = Uuid::new_v4();
        h.server
            .post(&format!("/api/v1/campaigns/{}/start", campaign.id))
            .json(&json!({
                "recipients": [{ "subscriber_id": subscriber, "email": "fleuriste@centre-ville.example" }]
            }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        h.repos
            .records
            .mark_sent(campaign.id, subscriber, Utc::now())
            .await
            .unwrap();

        let sig = h.codec.sign(campaign.id, subscriber);
        for _ in 0..3 {
            h.server
                .get("/track/open")
                .add_query_param("c", campaign.id)
                .add_query_param("s", subscriber)
                .add_query_param("sig", &sig)
                .await
                .assert_status_ok();
        }

        let fetched = h
            .server
            .get(&format!("/api/v1/campaigns/{}", campaign.id))
            .await
            .json::<CampaignResponse>();
        assert_eq!(fetched.total_opened, 1);
    }

    #[tokio::test]
    async fn test_click_redirects_for_unknown_subscriber() {
        let h = harness();
        let campaign = Uuid::new_v4();
        let subscriber = Uuid::new_v4();
        let sig = h.codec.sign(campaign, subscriber);

        let response = h
            .server
            .get("/track/click")
            .add_query_param("c", campaign)
            .add_query_param("s", subscriber)
            .add_query_param("sig", &sig)
            .add_query_param("url", "https://boulangerie.example/horaires")
            .await;
        response.assert_status(StatusCode::FOUND);
        assert_eq!(
            response.header("location"),
            "https://boulangerie.example/horaires"
        );

        let fallback = h
            .server
            .get("/track/click")
            .add_query_param("url", "javascript:alert(1)")
            .await;
        fallback.assert_status(StatusCode::FOUND);
        assert_eq!(fallback.header("location"), "https://annuaire.example/");
    }

    #[tokio::test]
    async fn test_repeated_query_keys_still_tracked() {
        let h = harness();
        let open = h
            .server
            .get("/track/open")
            .add_query_param("c", "a")
            .add_query_param("c", "b")
            .await;
        open.assert_status_ok();
        assert_eq!(open.header("content-type"), "image/gif");

        let campaign = Uuid::new_v4();
        let subscriber = Uuid::new_v4();
        let click = h
            .server
            .get("/track/click")
            .add_query_param("c", campaign)
            .add_query_param("s", subscriber)
            .add_query_param("sig", h.codec.sign(campaign, subscriber))
            .add_query_param("url", "https://Marche.Example/etals")
            .add_query_param("url", "https://ailleurs.example/")
            .await;
        click.assert_status(StatusCode::FOUND);
        assert_eq!(click.header("location"), "https://Marche.Example/etals");

        h.server
            .get("/track/unsubscribe")
            .add_query_param("s", "x")
            .add_query_param("s", "y")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsubscribe_link() {
        let h = harness();
        let campaign = create(&h).await;
        let subscriber = Uuid::new_v4();
        h.server
            .post(&format!("/api/v1/campaigns/{}/start", campaign.id))
            .json(&json!({
                "recipients": [
                    { "subscriber_id": subscriber, "email": "opticien@centre-ville.example" },
                    { "subscriber_id": Uuid::new_v4(), "email": "cordonnier@centre-ville.example" }
                ]
            }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let sig = h.codec.sign(campaign.id, subscriber);
        let response = h
            .server
            .post("/track/unsubscribe")
            .add_query_param("c", campaign.id)
            .add_query_param("s", subscriber)
            .add_query_param("sig", &sig)
            .await;
        response.assert_status_ok();

        let queue = h
            .server
            .get("/api/v1/queue/status")
            .await
            .json::<QueueStatusResponse>();
        assert_eq!(queue.pending, 1);

        h.server
            .get("/track/unsubscribe")
            .add_query_param("c", campaign.id)
            .add_query_param("s", subscriber)
            .add_query_param("sig", "forged")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let h = harness();
        let response = h.server.get("/api-docs/openapi.json").await;
        response.assert_status_ok();
        let doc = response.json::<Value>();
        assert!(doc["paths"]["/api/v1/campaigns/{id}/start"].is_object());
        assert!(doc["paths"]["/track/click"].is_object());
    }
}
