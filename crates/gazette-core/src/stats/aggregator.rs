//! Stats Aggregator - counts, rates and activity feed for one campaign

use chrono::{DateTime, Utc};
use gazette_common::types::CampaignId;
use gazette_common::{Error, Result};
use gazette_storage::models::{ActivityAction, ActivityEntry};
use gazette_storage::repository::Repositories;
use serde::Serialize;

/// Number of open/click events returned in the activity feed
pub const RECENT_ACTIVITY_LIMIT: i64 = 50;

/// Rounded percentage of `count` over `total`, halves rounded up; 0 when `total` is 0
pub fn percentage(count: i64, total: i64) -> u32 {
    if total <= 0 || count <= 0 {
        return 0;
    }
    ((count * 200 + total) / (total * 2)) as u32
}

/// Operator guidance derived from the open rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Performance {
    #[serde(rename = "Excellente")]
    Excellent,
    #[serde(rename = "Bonne")]
    Good,
    #[serde(rename = "À améliorer")]
    NeedsImprovement,
}

impl Performance {
    pub fn from_open_rate(open_rate: u32) -> Self {
        match open_rate {
            20.. => Performance::Excellent,
            10.. => Performance::Good,
            _ => Performance::NeedsImprovement,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Performance::Excellent => "Excellente",
            Performance::Good => "Bonne",
            Performance::NeedsImprovement => "À améliorer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    pub id: CampaignId,
    pub title: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rates {
    pub delivery: u32,
    pub open: u32,
    pub click: u32,
    pub failure: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
    pub failed: i64,
    pub unsubscribed: i64,
    pub rates: Rates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityItem {
    pub email: String,
    pub name: Option<String>,
    pub action: ActivityAction,
    pub timestamp: DateTime<Utc>,
}

impl From<ActivityEntry> for ActivityItem {
    fn from(entry: ActivityEntry) -> Self {
        Self {
            email: entry.email,
            name: entry.name,
            action: entry.action,
            timestamp: entry.timestamp,
        }
    }
}

/// Dashboard view of one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    pub campaign: CampaignSummary,
    pub stats: DeliveryStats,
    pub performance: Performance,
    pub recent_activity: Vec<ActivityItem>,
}

/// Read-only aggregation over delivery records.
///
/// Mid-send and finished campaigns go through the same path; totals are
/// whatever the store holds at query time.
#[derive(Clone)]
pub struct StatsAggregator {
    repos: Repositories,
}

impl StatsAggregator {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn campaign_stats(&self, campaign_id: CampaignId) -> Result<CampaignStats> {
        let campaign = self
            .repos
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Campaign {} not found", campaign_id)))?;

        let counts = self.repos.records.counts(campaign_id).await?;
        let activity = self
            .repos
            .records
            .recent_activity(campaign_id, RECENT_ACTIVITY_LIMIT)
            .await?;

        let sent = i64::from(campaign.total_sent);
        let rates = Rates {
            delivery: percentage(counts.delivered, sent),
            open: percentage(counts.opened, sent),
            click: percentage(counts.clicked, sent),
            failure: percentage(counts.failed, sent),
        };

        Ok(CampaignStats {
            campaign: CampaignSummary {
                id: campaign.id,
                title: campaign.title,
                status: campaign.status,
                sent_at: campaign.sent_at,
            },
            stats: DeliveryStats {
                sent,
                delivered: counts.delivered,
                opened: counts.opened,
                clicked: counts.clicked,
                failed: counts.failed,
                unsubscribed: counts.unsubscribed,
                rates,
            },
            performance: Performance::from_open_rate(rates.open),
            recent_activity: activity.into_iter().map(ActivityItem::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gazette_storage::models::{CampaignStatus, CreateCampaign, Recipient};
    use gazette_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(40, 200), 20);
        assert_eq!(percentage(10, 200), 5);
        assert_eq!(percentage(5, 200), 3);
        assert_eq!(percentage(3, 22), 14);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(7, 0), 0);
    }

    #[test]
    fn test_performance_thresholds() {
        assert_eq!(Performance::from_open_rate(35), Performance::Excellent);
        assert_eq!(Performance::from_open_rate(20), Performance::Excellent);
        assert_eq!(Performance::from_open_rate(19), Performance::Good);
        assert_eq!(Performance::from_open_rate(10), Performance::Good);
        assert_eq!(Performance::from_open_rate(9).label(), "À améliorer");
        assert_eq!(
            serde_json::to_string(&Performance::Good).unwrap(),
            "\"Bonne\""
        );
    }

    async fn seeded(repos: &Repositories, n: usize) -> (CampaignId, Vec<Recipient>) {
        let campaign = repos
            .campaigns
            .create(CreateCampaign {
                title: "Rentrée des associations".to_string(),
                subject: "Forum le 7 septembre".to_string(),
                html_body: "<p>Forum</p>".to_string(),
                text_body: None,
                from_address: None,
                from_name: None,
            })
            .await
            .unwrap();
        let recipients: Vec<Recipient> = (0..n)
            .map(|i| Recipient {
                subscriber_id: Uuid::new_v4(),
                email: format!("membre{}@club.example", i),
                name: Some(format!("Membre {}", i)),
                unsubscribed: false,
            })
            .collect();
        repos
            .records
            .create_pending(campaign.id, &recipients)
            .await
            .unwrap();
        repos
            .campaigns
            .transition(campaign.id, &[CampaignStatus::Draft], CampaignStatus::Sending)
            .await
            .unwrap();
        (campaign.id, recipients)
    }

    #[tokio::test]
    async fn test_stats_mid_send() {
        let repos = Repositories::memory(MemoryStore::new());
        let (id, recipients) = seeded(&repos, 22).await;
        let base = Utc::now();

        for (i, r) in recipients.iter().enumerate() {
            if i < 20 {
                repos.records.mark_sent(id, r.subscriber_id, base).await.unwrap();
            } else {
                repos
                    .records
                    .mark_failed(id, r.subscriber_id, "550 unknown user", base)
                    .await
                    .unwrap();
            }
        }
        for (i, r) in recipients.iter().take(5).enumerate() {
            let at = base + Duration::seconds(i as i64 + 1);
            repos.records.record_open(id, r.subscriber_id, at).await.unwrap();
            if i < 3 {
                let at = base + Duration::seconds(10 + i as i64);
                repos.records.record_click(id, r.subscriber_id, at).await.unwrap();
            }
        }
        repos
            .records
            .record_unsubscribe(id, recipients[4].subscriber_id, base)
            .await
            .unwrap();

        let stats = StatsAggregator::new(repos).campaign_stats(id).await.unwrap();

        assert_eq!(stats.campaign.status, "sending");
        assert_eq!(stats.stats.sent, 20);
        assert_eq!(stats.stats.delivered, 20);
        assert_eq!(stats.stats.opened, 5);
        assert_eq!(stats.stats.clicked, 3);
        assert_eq!(stats.stats.failed, 2);
        assert_eq!(stats.stats.unsubscribed, 1);
        assert_eq!(
            stats.stats.rates,
            Rates {
                delivery: 100,
                open: 25,
                click: 15,
                failure: 10,
            }
        );
        assert_eq!(stats.performance, Performance::Excellent);

        assert_eq!(stats.recent_activity.len(), 8);
        assert_eq!(stats.recent_activity[0].action, ActivityAction::Clicked);
        assert_eq!(stats.recent_activity[0].email, "membre2@club.example");
        assert!(stats
            .recent_activity
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_stats_before_any_send() {
        let repos = Repositories::memory(MemoryStore::new());
        let (id, _) = seeded(&repos, 3).await;

        let stats = StatsAggregator::new(repos).campaign_stats(id).await.unwrap();
        assert_eq!(stats.stats.rates, Rates::default());
        assert_eq!(stats.performance, Performance::NeedsImprovement);
        assert!(stats.recent_activity.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_campaign() {
        let repos = Repositories::memory(MemoryStore::new());
        let err = StatsAggregator::new(repos)
            .campaign_stats(Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
