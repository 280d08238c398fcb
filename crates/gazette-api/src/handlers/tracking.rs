//! Tracking handlers - open pixel, click redirect, unsubscribe
//!
//! These routes are hit by mail clients and link scanners. They never fail:
//! the pixel is always served and the redirect always issued, whatever the
//! token or the store says. The query string is read raw so that repeated or
//! malformed parameters cannot turn into an extractor rejection; the first
//! occurrence of a key wins.

use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use gazette_core::tracking::TRANSPARENT_GIF;
use gazette_core::{TrackingQuery, UnsubscribeResult};
use std::sync::Arc;
use url::form_urlencoded;
use utoipa::IntoParams;

use crate::state::AppState;

/// Signed tracking parameters
#[derive(Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TrackingParams {
    /// Campaign ID
    pub c: Option<String>,
    /// Subscriber ID
    pub s: Option<String>,
    /// Link signature
    pub sig: Option<String>,
}

impl TrackingParams {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = QueryPairs::parse(raw);
        Self {
            c: pairs.first("c"),
            s: pairs.first("s"),
            sig: pairs.first("sig"),
        }
    }

    fn query(&self) -> TrackingQuery<'_> {
        TrackingQuery {
            campaign: self.c.as_deref(),
            subscriber: self.s.as_deref(),
            sig: self.sig.as_deref(),
        }
    }
}

/// Click parameters
#[derive(Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClickParams {
    pub c: Option<String>,
    pub s: Option<String>,
    pub sig: Option<String>,
    /// Destination URL
    pub url: Option<String>,
}

impl ClickParams {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = QueryPairs::parse(raw);
        Self {
            c: pairs.first("c"),
            s: pairs.first("s"),
            sig: pairs.first("sig"),
            url: pairs.first("url"),
        }
    }
}

/// Decoded query string, in request order
struct QueryPairs(Vec<(String, String)>);

impl QueryPairs {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self(pairs)
    }

    fn first(&self, key: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Open pixel
#[utoipa::path(
    get,
    path = "/track/open",
    tag = "tracking",
    params(TrackingParams),
    responses(
        (status = 200, description = "1x1 transparent GIF")
    )
)]
pub async fn track_open(State(state): State<Arc<AppState>>, RawQuery(raw): RawQuery) -> Response {
    let params = TrackingParams::parse(raw.as_deref());
    state.recorder.record_open(params.query()).await;

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        TRANSPARENT_GIF,
    )
        .into_response()
}

/// Click redirect
#[utoipa::path(
    get,
    path = "/track/click",
    tag = "tracking",
    params(ClickParams),
    responses(
        (status = 302, description = "Redirect to the destination, or to the fallback page")
    )
)]
pub async fn track_click(State(state): State<Arc<AppState>>, RawQuery(raw): RawQuery) -> Response {
    let params = ClickParams::parse(raw.as_deref());
    let query = TrackingQuery {
        campaign: params.c.as_deref(),
        subscriber: params.s.as_deref(),
        sig: params.sig.as_deref(),
    };
    let target = state.recorder.record_click(query, params.url.as_deref()).await;

    (
        StatusCode::FOUND,
        [(header::LOCATION, target), (header::CACHE_CONTROL, NO_CACHE.to_string())],
    )
        .into_response()
}

/// Unsubscribe link and RFC 8058 one-click POST
#[utoipa::path(
    get,
    path = "/track/unsubscribe",
    tag = "tracking",
    params(TrackingParams),
    responses(
        (status = 200, description = "Unsubscribed"),
        (status = 400, description = "Invalid or expired link")
    )
)]
pub async fn unsubscribe(State(state): State<Arc<AppState>>, RawQuery(raw): RawQuery) -> Response {
    let params = TrackingParams::parse(raw.as_deref());
    match state.recorder.unsubscribe(params.query()).await {
        UnsubscribeResult::Unsubscribed => (StatusCode::OK, Html(UNSUBSCRIBED_PAGE)).into_response(),
        UnsubscribeResult::Invalid => {
            (StatusCode::BAD_REQUEST, Html(INVALID_LINK_PAGE)).into_response()
        }
    }
}

const UNSUBSCRIBED_PAGE: &str = r#"<!DOCTYPE html>
<html lang="fr">
<head><meta charset="utf-8"><title>Désinscription</title></head>
<body>
<h1>Désinscription confirmée</h1>
<p>Vous ne recevrez plus cette lettre d'information.</p>
</body>
</html>"#;

const INVALID_LINK_PAGE: &str = r#"<!DOCTYPE html>
<html lang="fr">
<head><meta charset="utf-8"><title>Lien invalide</title></head>
<body>
<h1>Lien invalide</h1>
<p>Ce lien de désinscription n'est pas reconnu.</p>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_first_occurrence_wins() {
        let params = ClickParams::parse(Some(
            "c=one&url=https%3A%2F%2Fa.example%2F%3Fx%3D1&c=two&url=https://b.example&sig",
        ));
        assert_eq!(params.c.as_deref(), Some("one"));
        assert_eq!(params.url.as_deref(), Some("https://a.example/?x=1"));
        assert_eq!(params.sig.as_deref(), Some(""));
        assert_eq!(params.s, None);

        let empty = TrackingParams::parse(None);
        assert_eq!(empty.c, None);
    }
}
