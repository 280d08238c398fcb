//! In-memory storage backend
//!
//! Implements every repository trait over maps guarded by a single lock, so
//! the compound updates (record transition plus campaign counter) happen
//! under one write guard exactly like a database transaction would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gazette_common::types::{CampaignId, QueueJobId, SubscriberId};
use gazette_common::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    ActivityAction, ActivityEntry, Campaign, CampaignStatus, CreateCampaign, DeliveryCounts,
    DeliveryRecord, DeliveryStatus, QueueJob, QueueJobStatus, QueueStatusCounts, Recipient,
    TrackingOutcome,
};
use crate::repository::{CampaignRepository, DeliveryRecordRepository, QueueJobRepository};

#[derive(Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    parked: HashMap<CampaignId, Vec<Recipient>>,
    records: HashMap<(CampaignId, SubscriberId), DeliveryRecord>,
    jobs: HashMap<QueueJobId, QueueJob>,
}

impl State {
    fn bump(&mut self, campaign_id: CampaignId, f: impl FnOnce(&mut Campaign)) {
        if let Some(campaign) = self.campaigns.get_mut(&campaign_id) {
            f(campaign);
            campaign.updated_at = Utc::now();
        }
    }

    fn discard_where(&mut self, pred: impl Fn(&QueueJob) -> bool) -> QueueStatusCounts {
        let mut dropped = QueueStatusCounts::default();
        self.jobs.retain(|_, job| {
            if !pred(job) {
                return true;
            }
            if let Some(status) = job.status_enum() {
                dropped.add(status, 1);
            }
            false
        });
        dropped
    }
}

/// Shared, non-durable store for single-process deployments and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            title: input.title,
            subject: input.subject,
            html_body: input.html_body,
            text_body: input.text_body,
            from_address: input.from_address,
            from_name: input.from_name,
            status: CampaignStatus::Draft.to_string(),
            total_recipients: 0,
            total_sent: 0,
            total_opened: 0,
            total_clicked: 0,
            total_failed: 0,
            scheduled_at: None,
            started_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };

        self.state
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state.campaigns.values().cloned().collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status_enum() == Some(status))
            .cloned()
            .collect();
        // started campaigns first, oldest start first
        campaigns.sort_by_key(|c| (c.started_at.is_none(), c.started_at, c.created_at));
        Ok(campaigns)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| {
                c.status_enum() == Some(CampaignStatus::Scheduled)
                    && c.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.scheduled_at);
        Ok(campaigns)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        let Some(current) = campaign.status_enum() else {
            return Ok(None);
        };
        if !from.contains(&current) {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = to.to_string();
        if to == CampaignStatus::Sending && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if to == CampaignStatus::Sent {
            campaign.sent_at = Some(now);
        }
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }

    async fn schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
        recipients: &[Recipient],
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if campaign.status_enum() != Some(CampaignStatus::Draft) {
            return Ok(None);
        }

        campaign.status = CampaignStatus::Scheduled.to_string();
        campaign.scheduled_at = Some(at);
        campaign.updated_at = Utc::now();
        let campaign = campaign.clone();
        state.parked.insert(id, recipients.to_vec());
        Ok(Some(campaign))
    }

    async fn scheduled_recipients(&self, id: CampaignId) -> Result<Vec<Recipient>> {
        Ok(self
            .state
            .read()
            .await
            .parked
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()> {
        self.state
            .write()
            .await
            .bump(id, |c| c.total_recipients = total);
        Ok(())
    }
}

#[async_trait]
impl DeliveryRecordRepository for MemoryStore {
    async fn create_pending(
        &self,
        campaign_id: CampaignId,
        recipients: &[Recipient],
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut created = 0;
        for recipient in recipients {
            let key = (campaign_id, recipient.subscriber_id);
            if state.records.contains_key(&key) {
                continue;
            }
            state
                .records
                .insert(key, DeliveryRecord::pending(campaign_id, recipient, now));
            created += 1;
        }
        Ok(created)
    }

    async fn get(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<Option<DeliveryRecord>> {
        Ok(self
            .state
            .read()
            .await
            .records
            .get(&(campaign_id, subscriber_id))
            .cloned())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DeliveryRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<DeliveryRecord> = state
            .records
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&(campaign_id, subscriber_id)) else {
            return Ok(false);
        };
        if record.status_enum() != Some(DeliveryStatus::Pending) {
            return Ok(false);
        }

        record.status = DeliveryStatus::Sent.to_string();
        record.sent_at = Some(at);
        state.bump(campaign_id, |c| c.total_sent += 1);
        Ok(true)
    }

    async fn mark_failed(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&(campaign_id, subscriber_id)) else {
            return Ok(false);
        };
        if record.status_enum() != Some(DeliveryStatus::Pending) {
            return Ok(false);
        }

        record.status = DeliveryStatus::Failed.to_string();
        record.failure_reason = Some(reason.to_string());
        record.failed_at = Some(at);
        state.bump(campaign_id, |c| c.total_failed += 1);
        Ok(true)
    }

    async fn record_open(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&(campaign_id, subscriber_id)) else {
            return Ok(TrackingOutcome::Unknown);
        };
        if !record.is_sent() {
            return Ok(TrackingOutcome::NotSent);
        }
        if record.first_opened_at.is_some() {
            return Ok(TrackingOutcome::Duplicate);
        }

        record.first_opened_at = Some(at);
        state.bump(campaign_id, |c| c.total_opened += 1);
        Ok(TrackingOutcome::Recorded)
    }

    async fn record_click(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&(campaign_id, subscriber_id)) else {
            return Ok(TrackingOutcome::Unknown);
        };
        if !record.is_sent() {
            return Ok(TrackingOutcome::NotSent);
        }
        if record.first_clicked_at.is_some() {
            return Ok(TrackingOutcome::Duplicate);
        }

        record.first_clicked_at = Some(at);
        state.bump(campaign_id, |c| c.total_clicked += 1);
        Ok(TrackingOutcome::Recorded)
    }

    async fn record_unsubscribe(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&(campaign_id, subscriber_id)) else {
            return Ok(TrackingOutcome::Unknown);
        };
        if record.unsubscribed_at.is_some() {
            return Ok(TrackingOutcome::Duplicate);
        }

        record.unsubscribed_at = Some(at);
        if record.status_enum() == Some(DeliveryStatus::Pending) {
            record.status = DeliveryStatus::Unsubscribed.to_string();
        }
        Ok(TrackingOutcome::Recorded)
    }

    async fn counts(&self, campaign_id: CampaignId) -> Result<DeliveryCounts> {
        let state = self.state.read().await;
        let mut counts = DeliveryCounts::default();
        for record in state.records.values().filter(|r| r.campaign_id == campaign_id) {
            match record.status_enum() {
                Some(DeliveryStatus::Pending) => counts.pending += 1,
                Some(DeliveryStatus::Sent) => counts.delivered += 1,
                Some(DeliveryStatus::Failed) => counts.failed += 1,
                Some(DeliveryStatus::Unsubscribed) | None => {}
            }
            if record.is_opened() {
                counts.opened += 1;
            }
            if record.is_clicked() {
                counts.clicked += 1;
            }
            if record.is_unsubscribed() {
                counts.unsubscribed += 1;
            }
        }
        Ok(counts)
    }

    async fn recent_activity(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>> {
        let state = self.state.read().await;
        let mut entries = Vec::new();
        for record in state.records.values().filter(|r| r.campaign_id == campaign_id) {
            let events = [
                (ActivityAction::Opened, record.first_opened_at),
                (ActivityAction::Clicked, record.first_clicked_at),
            ];
            for (action, at) in events {
                if let Some(timestamp) = at {
                    entries.push(ActivityEntry {
                        subscriber_id: record.subscriber_id,
                        email: record.email.clone(),
                        name: record.name.clone(),
                        action,
                        timestamp,
                    });
                }
            }
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn suppressed(&self, subscriber_ids: &[SubscriberId]) -> Result<Vec<SubscriberId>> {
        let wanted: HashSet<&SubscriberId> = subscriber_ids.iter().collect();
        let state = self.state.read().await;
        let found: HashSet<SubscriberId> = state
            .records
            .values()
            .filter(|r| r.is_unsubscribed() && wanted.contains(&r.subscriber_id))
            .map(|r| r.subscriber_id)
            .collect();
        Ok(found.into_iter().collect())
    }

    async fn delete_by_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|(cid, _), _| *cid != campaign_id);
        Ok((before - state.records.len()) as u64)
    }
}

#[async_trait]
impl QueueJobRepository for MemoryStore {
    async fn enqueue(&self, campaign_id: CampaignId, recipients: &[Recipient]) -> Result<u64> {
        let mut state = self.state.write().await;
        let queued: HashSet<SubscriberId> = state
            .jobs
            .values()
            .filter(|j| j.campaign_id == campaign_id)
            .map(|j| j.subscriber_id)
            .collect();

        let now = Utc::now();
        let mut created = 0;
        for (position, recipient) in recipients.iter().enumerate() {
            if queued.contains(&recipient.subscriber_id) {
                continue;
            }
            let job = QueueJob::pending(campaign_id, recipient, position as i32, now);
            state.jobs.insert(job.id, job);
            created += 1;
        }
        Ok(created)
    }

    async fn claim_batch(&self, campaign_id: CampaignId, limit: usize) -> Result<Vec<QueueJob>> {
        let mut state = self.state.write().await;
        let mut ids: Vec<(i32, QueueJobId)> = state
            .jobs
            .values()
            .filter(|j| {
                j.campaign_id == campaign_id && j.status_enum() == Some(QueueJobStatus::Pending)
            })
            .map(|j| (j.position, j.id))
            .collect();
        ids.sort();
        ids.truncate(limit);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = QueueJobStatus::Processing.to_string();
                job.claimed_at = Some(now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: QueueJobId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status_enum() == Some(QueueJobStatus::Processing) => {
                job.status = QueueJobStatus::Completed.to_string();
                job.finished_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, job_id: QueueJobId, error: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status_enum() == Some(QueueJobStatus::Processing) => {
                job.status = QueueJobStatus::Failed.to_string();
                job.last_error = Some(error.to_string());
                job.finished_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, job_ids: &[QueueJobId]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for id in job_ids {
            if let Some(job) = state.jobs.get_mut(id) {
                if job.status_enum() == Some(QueueJobStatus::Processing) {
                    job.status = QueueJobStatus::Pending.to_string();
                    job.claimed_at = None;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn discard_campaign(&self, campaign_id: CampaignId) -> Result<QueueStatusCounts> {
        let mut state = self.state.write().await;
        Ok(state.discard_where(|job| {
            job.campaign_id == campaign_id
                && matches!(
                    job.status_enum(),
                    Some(QueueJobStatus::Pending | QueueJobStatus::Processing)
                )
        }))
    }

    async fn discard_subscriber(
        &self,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<QueueStatusCounts> {
        let mut state = self.state.write().await;
        let pending = |job: &QueueJob| {
            job.subscriber_id == subscriber_id
                && job.status_enum() == Some(QueueJobStatus::Pending)
        };
        let campaigns: Vec<CampaignId> = state
            .jobs
            .values()
            .filter(|job| pending(job))
            .map(|job| job.campaign_id)
            .collect();
        let dropped = state.discard_where(pending);

        for campaign_id in campaigns {
            if let Some(record) = state.records.get_mut(&(campaign_id, subscriber_id)) {
                if record.status_enum() == Some(DeliveryStatus::Pending) {
                    record.status = DeliveryStatus::Unsubscribed.to_string();
                    record.unsubscribed_at = Some(at);
                }
            }
        }
        Ok(dropped)
    }

    async fn purge_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| job.campaign_id != campaign_id);
        Ok((before - state.jobs.len()) as u64)
    }

    async fn pending_count(&self, campaign_id: CampaignId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| {
                j.campaign_id == campaign_id && j.status_enum() == Some(QueueJobStatus::Pending)
            })
            .count() as u64)
    }

    async fn outstanding_count(&self, campaign_id: CampaignId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| {
                j.campaign_id == campaign_id
                    && matches!(
                        j.status_enum(),
                        Some(QueueJobStatus::Pending | QueueJobStatus::Processing)
                    )
            })
            .count() as u64)
    }

    async fn list_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<QueueJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<QueueJob> = state
            .jobs
            .values()
            .filter(|j| {
                j.status_enum() == Some(QueueJobStatus::Processing)
                    && j.claimed_at.is_some_and(|at| at <= claimed_before)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.campaign_id, j.position));
        Ok(jobs)
    }

    async fn status_counts(&self) -> Result<QueueStatusCounts> {
        let state = self.state.read().await;
        let mut counts = QueueStatusCounts::default();
        for status in state.jobs.values().filter_map(|j| j.status_enum()) {
            counts.add(status, 1);
        }
        Ok(counts)
    }
}
