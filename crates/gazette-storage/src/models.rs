//! Database models

use chrono::{DateTime, Utc};
use gazette_common::types::{CampaignId, DeliveryRecordId, QueueJobId, SubscriberId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Cancelled,
    Error,
}

impl CampaignStatus {
    /// Statuses a campaign never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Sent | CampaignStatus::Cancelled | CampaignStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "sent" => Ok(CampaignStatus::Sent),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "error" => Ok(CampaignStatus::Error),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub title: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
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

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Number of transport attempts that reached an outcome
    pub fn total_attempted(&self) -> i32 {
        self.total_sent + self.total_failed
    }

    /// Share of attempted sends that failed, in [0, 1]
    pub fn failure_ratio(&self) -> f64 {
        let attempted = self.total_attempted();
        if attempted <= 0 {
            0.0
        } else {
            self.total_failed as f64 / attempted as f64
        }
    }
}

/// Input for creating a campaign (authored elsewhere)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub title: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
}

/// Resolved recipient handed over by the segmentation layer
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Recipient {
    pub subscriber_id: SubscriberId,
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub unsubscribed: bool,
}

/// Base delivery status of a record; opens and clicks are layered on top of `Sent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Unsubscribed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Unsubscribed => "unsubscribed",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "unsubscribed" => Ok(DeliveryStatus::Unsubscribed),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Outcome history of one recipient within one campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryRecordId,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub email: String,
    pub name: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub first_opened_at: Option<DateTime<Utc>>,
    pub first_clicked_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Fresh pending record for a recipient
    pub fn pending(campaign_id: CampaignId, recipient: &Recipient, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            campaign_id,
            subscriber_id: recipient.subscriber_id,
            email: recipient.email.clone(),
            name: recipient.name.clone(),
            status: DeliveryStatus::Pending.to_string(),
            failure_reason: None,
            sent_at: None,
            failed_at: None,
            first_opened_at: None,
            first_clicked_at: None,
            unsubscribed_at: None,
            created_at: now,
        }
    }

    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }

    /// The transport accepted the message; engagement may only be recorded then
    pub fn is_sent(&self) -> bool {
        self.status_enum() == Some(DeliveryStatus::Sent)
    }

    pub fn is_opened(&self) -> bool {
        self.first_opened_at.is_some()
    }

    pub fn is_clicked(&self) -> bool {
        self.first_clicked_at.is_some()
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed_at.is_some()
    }
}

/// Per-campaign counts read from delivery records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub pending: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
    pub failed: i64,
    pub unsubscribed: i64,
}

/// Engagement action shown in the activity feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Opened,
    Clicked,
}

/// One open or click event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub subscriber_id: SubscriberId,
    pub email: String,
    pub name: Option<String>,
    pub action: ActivityAction,
    pub timestamp: DateTime<Utc>,
}

/// Result of applying a tracking event to a delivery record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingOutcome {
    /// First observation; counters were incremented
    Recorded,
    /// Already observed before; nothing changed
    Duplicate,
    /// Record exists but has not been sent (pending, failed, ...)
    NotSent,
    /// No record for this (campaign, subscriber) pair
    Unknown,
}

/// Queue job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueJobStatus::Pending => "pending",
            QueueJobStatus::Processing => "processing",
            QueueJobStatus::Completed => "completed",
            QueueJobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueJobStatus::Pending),
            "processing" => Ok(QueueJobStatus::Processing),
            "completed" => Ok(QueueJobStatus::Completed),
            "failed" => Ok(QueueJobStatus::Failed),
            _ => Err(format!("Invalid queue job status: {}", s)),
        }
    }
}

/// Dispatch attempt for one recipient of a sending campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: QueueJobId,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub email: String,
    pub name: Option<String>,
    pub position: i32,
    pub status: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueJob {
    /// Fresh pending job for a recipient
    pub fn pending(
        campaign_id: CampaignId,
        recipient: &Recipient,
        position: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            campaign_id,
            subscriber_id: recipient.subscriber_id,
            email: recipient.email.clone(),
            name: recipient.name.clone(),
            position,
            status: QueueJobStatus::Pending.to_string(),
            last_error: None,
            created_at: now,
            claimed_at: None,
            finished_at: None,
        }
    }

    /// Get status enum
    pub fn status_enum(&self) -> Option<QueueJobStatus> {
        self.status.parse().ok()
    }
}

/// Job counts grouped by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStatusCounts {
    /// Count one job in the given status
    pub fn add(&mut self, status: QueueJobStatus, n: u64) {
        match status {
            QueueJobStatus::Pending => self.pending += n,
            QueueJobStatus::Processing => self.processing += n,
            QueueJobStatus::Completed => self.completed += n,
            QueueJobStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(sent: i32, failed: i32) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: uuid::Uuid::new_v4(),
            title: "Marché de Noël".to_string(),
            subject: "Le marché ouvre samedi".to_string(),
            html_body: "<p>Bonjour</p>".to_string(),
            text_body: None,
            from_address: None,
            from_name: None,
            status: "sending".to_string(),
            total_recipients: sent + failed,
            total_sent: sent,
            total_opened: 0,
            total_clicked: 0,
            total_failed: failed,
            scheduled_at: None,
            started_at: Some(now),
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Sending,
            CampaignStatus::Sent,
            CampaignStatus::Cancelled,
            CampaignStatus::Error,
        ] {
            assert_eq!(status.to_string().parse::<CampaignStatus>(), Ok(status));
        }
        assert!("paused".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CampaignStatus::Draft.is_terminal());
        assert!(!CampaignStatus::Sending.is_terminal());
        assert!(CampaignStatus::Sent.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(CampaignStatus::Error.is_terminal());
    }

    #[test]
    fn test_failure_ratio() {
        assert_eq!(campaign(0, 0).failure_ratio(), 0.0);
        assert_eq!(campaign(22, 3).failure_ratio(), 3.0 / 25.0);
        assert_eq!(campaign(0, 4).failure_ratio(), 1.0);
    }

    #[test]
    fn test_layered_delivery_state() {
        let recipient = Recipient {
            subscriber_id: uuid::Uuid::new_v4(),
            email: "paul@fromagerie.example".to_string(),
            name: Some("Paul".to_string()),
            unsubscribed: false,
        };
        let mut record = DeliveryRecord::pending(uuid::Uuid::new_v4(), &recipient, Utc::now());
        assert!(!record.is_sent());

        record.status = DeliveryStatus::Sent.to_string();
        record.first_opened_at = Some(Utc::now());
        record.first_clicked_at = Some(Utc::now());
        assert!(record.is_sent());
        assert!(record.is_opened());
        assert!(record.is_clicked());
    }
}
