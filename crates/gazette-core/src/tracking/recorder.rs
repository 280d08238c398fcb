//! Tracking recorder - applies open, click and unsubscribe signals
//!
//! Every entry point absorbs its own failures: a bad token or a storage error
//! is logged and the caller still serves its pixel, redirect or page.

use super::token::{TrackingCodec, TrackingToken};
use crate::metrics::Metrics;
use crate::queue::QueueCounters;
use chrono::Utc;
use gazette_storage::models::TrackingOutcome;
use gazette_storage::repository::Repositories;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw tracking query parameters as received
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackingQuery<'a> {
    pub campaign: Option<&'a str>,
    pub subscriber: Option<&'a str>,
    pub sig: Option<&'a str>,
}

/// Result of an unsubscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeResult {
    /// The subscriber is (now) unsubscribed
    Unsubscribed,
    /// Token or record not recognised
    Invalid,
}

#[derive(Clone)]
pub struct TrackingRecorder {
    codec: Arc<TrackingCodec>,
    repos: Repositories,
    counters: Arc<QueueCounters>,
    metrics: Metrics,
}

impl TrackingRecorder {
    pub fn new(
        codec: Arc<TrackingCodec>,
        repos: Repositories,
        counters: Arc<QueueCounters>,
        metrics: Metrics,
    ) -> Self {
        Self {
            codec,
            repos,
            counters,
            metrics,
        }
    }

    fn token(&self, query: TrackingQuery<'_>, kind: &str) -> Option<TrackingToken> {
        let (Some(c), Some(s), Some(sig)) = (query.campaign, query.subscriber, query.sig) else {
            debug!(kind, "Tracking request without identifiers");
            return None;
        };

        match self.codec.decode(c, s, sig) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(kind, error = %e, "Rejected tracking token");
                None
            }
        }
    }

    /// Pixel fetched
    pub async fn record_open(&self, query: TrackingQuery<'_>) {
        let Some(token) = self.token(query, "open") else {
            return;
        };

        match self
            .repos
            .records
            .record_open(token.campaign_id, token.subscriber_id, Utc::now())
            .await
        {
            Ok(TrackingOutcome::Recorded) => {
                self.metrics.opens.inc();
                debug!(
                    campaign_id = %token.campaign_id,
                    subscriber_id = %token.subscriber_id,
                    "First open recorded"
                );
            }
            Ok(outcome) => debug!(
                campaign_id = %token.campaign_id,
                subscriber_id = %token.subscriber_id,
                ?outcome,
                "Open ignored"
            ),
            Err(e) => warn!(
                campaign_id = %token.campaign_id,
                error = %e,
                "Failed to record open"
            ),
        }
    }

    /// Link followed; returns where to redirect
    pub async fn record_click(&self, query: TrackingQuery<'_>, destination: Option<&str>) -> String {
        let target = self.codec.redirect_target(destination);

        let Some(token) = self.token(query, "click") else {
            return target;
        };

        match self
            .repos
            .records
            .record_click(token.campaign_id, token.subscriber_id, Utc::now())
            .await
        {
            Ok(TrackingOutcome::Recorded) => {
                self.metrics.clicks.inc();
                debug!(
                    campaign_id = %token.campaign_id,
                    subscriber_id = %token.subscriber_id,
                    "First click recorded"
                );
            }
            Ok(outcome) => debug!(
                campaign_id = %token.campaign_id,
                subscriber_id = %token.subscriber_id,
                ?outcome,
                "Click ignored"
            ),
            Err(e) => warn!(
                campaign_id = %token.campaign_id,
                error = %e,
                "Failed to record click"
            ),
        }

        target
    }

    /// Unsubscribe link or one-click POST
    pub async fn unsubscribe(&self, query: TrackingQuery<'_>) -> UnsubscribeResult {
        let Some(token) = self.token(query, "unsubscribe") else {
            return UnsubscribeResult::Invalid;
        };

        let now = Utc::now();
        let outcome = match self
            .repos
            .records
            .record_unsubscribe(token.campaign_id, token.subscriber_id, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(campaign_id = %token.campaign_id, error = %e, "Failed to record unsubscribe");
                return UnsubscribeResult::Invalid;
            }
        };

        match outcome {
            TrackingOutcome::Unknown => return UnsubscribeResult::Invalid,
            TrackingOutcome::Recorded => {
                self.metrics.unsubscribes.inc();
                info!(
                    campaign_id = %token.campaign_id,
                    subscriber_id = %token.subscriber_id,
                    "Subscriber unsubscribed"
                );
            }
            TrackingOutcome::Duplicate | TrackingOutcome::NotSent => {}
        }

        match self
            .repos
            .jobs
            .discard_subscriber(token.subscriber_id, now)
            .await
        {
            Ok(dropped) => {
                if dropped.total() > 0 {
                    debug!(
                        subscriber_id = %token.subscriber_id,
                        dropped = dropped.total(),
                        "Suppressed queued jobs"
                    );
                }
                self.counters.discarded(dropped);
            }
            Err(e) => warn!(
                subscriber_id = %token.subscriber_id,
                error = %e,
                "Failed to suppress queued jobs"
            ),
        }

        UnsubscribeResult::Unsubscribed
    }
}
