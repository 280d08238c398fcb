//! Batch Sender - Drains campaign queues at a bounded rate

use super::manager::CampaignManager;
use super::rate_limiter::{RatePolicy, SendPacer};
use super::template::TemplateRenderer;
use super::transport::{MailTransport, OutgoingMessage, TransportError};
use crate::metrics::Metrics;
use crate::queue::QueueCounters;
use chrono::Utc;
use gazette_common::config::Config;
use gazette_common::types::{CampaignId, QueueJobId};
use gazette_common::Result;
use gazette_storage::models::{Campaign, CampaignStatus, DeliveryStatus, QueueJob};
use gazette_storage::repository::Repositories;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason recorded on claims that were never settled
const INTERRUPTED: &str = "interrupted before the send was confirmed";

/// Slack added on top of the longest time a live worker can hold a batch
const STALE_CLAIM_MARGIN: Duration = Duration::from_secs(60);

/// How a campaign drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue exhausted; the campaign reached SENT or ERROR
    Finished(CampaignStatus),
    /// An operator cancelled the campaign
    Cancelled,
    /// Process shutdown; unsent claimed jobs went back to pending
    Interrupted,
    /// Someone else moved the campaign out of SENDING
    Skipped,
    /// Claimed jobs are still unsettled; the campaign is finished on a later poll
    Waiting,
}

enum Delivery {
    Sent,
    Failed,
    /// Recipient left the campaign (unsubscribed) after being enqueued
    Dropped,
}

/// Batch Sender - single long-lived queue worker
pub struct BatchSender {
    repos: Repositories,
    manager: Arc<CampaignManager>,
    renderer: TemplateRenderer,
    transport: Arc<dyn MailTransport>,
    counters: Arc<QueueCounters>,
    metrics: Metrics,
    policy: RatePolicy,
    failure_threshold: f64,
    send_timeout: Duration,
    poll_interval: Duration,
    stale_after: Option<Duration>,
    from_address: String,
    from_name: Option<String>,
}

impl BatchSender {
    /// Create a batch sender with default pacing and thresholds
    pub fn new(
        repos: Repositories,
        manager: Arc<CampaignManager>,
        renderer: TemplateRenderer,
        transport: Arc<dyn MailTransport>,
        counters: Arc<QueueCounters>,
        metrics: Metrics,
    ) -> Self {
        Self::from_config(
            repos,
            manager,
            renderer,
            transport,
            counters,
            metrics,
            &Config::default(),
        )
    }

    pub fn from_config(
        repos: Repositories,
        manager: Arc<CampaignManager>,
        renderer: TemplateRenderer,
        transport: Arc<dyn MailTransport>,
        counters: Arc<QueueCounters>,
        metrics: Metrics,
        config: &Config,
    ) -> Self {
        Self {
            repos,
            manager,
            renderer,
            transport,
            counters,
            metrics,
            policy: RatePolicy::from_config(&config.sender),
            failure_threshold: config.sender.failure_threshold,
            send_timeout: Duration::from_secs(config.smtp.timeout_secs),
            poll_interval: Duration::from_secs(config.sender.poll_interval_secs.max(1)),
            stale_after: None,
            from_address: config.smtp.from_address.clone(),
            from_name: config.smtp.from_name.clone(),
        }
    }

    /// Set batch size and inter-send delay
    pub fn with_policy(mut self, policy: RatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the failed/attempted ratio above which a campaign ends in ERROR
    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the per-send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Override how long a claim may stay unsettled before it is failed
    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = Some(age);
        self
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    /// Longest a live worker can hold a claimed batch, plus a margin
    fn stale_claim_age(&self) -> Duration {
        self.stale_after.unwrap_or_else(|| {
            let per_job = self.policy.send_interval + self.send_timeout;
            let batch = u32::try_from(self.policy.batch_size).unwrap_or(u32::MAX);
            per_job.saturating_mul(batch).saturating_add(STALE_CLAIM_MARGIN)
        })
    }

    /// Fail claims no live worker can still be holding.
    ///
    /// The transport may already have accepted those messages, so they are
    /// recorded as failed rather than sent again. Younger claims may belong
    /// to a peer worker and are left alone.
    pub async fn settle_stale_claims(&self) -> Result<usize> {
        let age = chrono::Duration::from_std(self.stale_claim_age())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let stale = self.repos.jobs.list_stale_claims(Utc::now() - age).await?;

        let mut settled = 0;
        for job in &stale {
            if !self.repos.jobs.fail(job.id, INTERRUPTED).await? {
                continue;
            }
            self.counters.failed();
            settled += 1;
            if self
                .repos
                .records
                .mark_failed(job.campaign_id, job.subscriber_id, INTERRUPTED, Utc::now())
                .await?
            {
                self.metrics.emails_failed.inc();
            }
        }

        if settled > 0 {
            warn!(jobs = settled, "Failed claims that were never settled");
        }
        Ok(settled)
    }

    /// Settle stale claims left by a previous run, then seed the queue counters
    pub async fn recover(&self) -> Result<()> {
        self.settle_stale_claims().await?;

        let counts = self.repos.jobs.status_counts().await?;
        self.counters.seed(counts);
        info!(
            pending = counts.pending,
            processing = counts.processing,
            completed = counts.completed,
            failed = counts.failed,
            "Queue counters seeded"
        );

        Ok(())
    }

    /// Run the worker until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.recover().await?;

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            batch_size = self.policy.batch_size,
            send_delay_ms = self.policy.send_interval.as_millis() as u64,
            failure_threshold = self.failure_threshold,
            "Batch sender started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&shutdown).await {
                        error!(error = %e, "Batch sender iteration failed");
                    }
                }
            }
        }

        info!("Batch sender stopped");
        Ok(())
    }

    /// One poll: settle stale claims, promote due schedules, then drain every
    /// SENDING campaign, oldest first
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<usize> {
        if let Err(e) = self.settle_stale_claims().await {
            error!(error = %e, "Failed to settle stale claims");
        }
        if let Err(e) = self.manager.promote_due(Utc::now()).await {
            error!(error = %e, "Failed to promote scheduled campaigns");
        }

        let mut drained = 0;
        for campaign in self.repos.campaigns.list_by_status(CampaignStatus::Sending).await? {
            if shutdown.is_cancelled() {
                break;
            }
            match self.drain_campaign(&campaign, shutdown).await {
                Ok(outcome) => {
                    debug!(campaign_id = %campaign.id, ?outcome, "Campaign drain ended");
                    drained += 1;
                }
                Err(e) => error!(campaign_id = %campaign.id, error = %e, "Campaign drain failed"),
            }
        }

        Ok(drained)
    }

    /// Send every queued job of one campaign, one at a time
    pub async fn drain_campaign(
        &self,
        campaign: &Campaign,
        shutdown: &CancellationToken,
    ) -> Result<DrainOutcome> {
        let halt = self.manager.cancellation_token(campaign.id);
        let mut pacer = SendPacer::new(self.policy);

        loop {
            if halt.is_cancelled() || shutdown.is_cancelled() {
                return self.halted(campaign.id, &[]).await;
            }

            let batch = self
                .repos
                .jobs
                .claim_batch(campaign.id, self.policy.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            self.counters.claimed(batch.len() as u64);
            debug!(campaign_id = %campaign.id, jobs = batch.len(), "Claimed batch");

            for (i, job) in batch.iter().enumerate() {
                if !pacer.ready(&halt).await || shutdown.is_cancelled() {
                    let unsent: Vec<QueueJobId> = batch[i..].iter().map(|j| j.id).collect();
                    return self.halted(campaign.id, &unsent).await;
                }

                let still_pending = match self.still_pending(campaign.id, job).await {
                    Ok(pending) => pending,
                    Err(e) => {
                        self.release_unsent(campaign.id, &batch[i..]).await;
                        return Err(e);
                    }
                };
                let delivery = if still_pending {
                    self.deliver(campaign, job).await
                } else {
                    self.drop_job(campaign.id, job).await
                };

                match delivery {
                    Ok(Delivery::Sent | Delivery::Failed) => pacer.record_send(),
                    Ok(Delivery::Dropped) => {}
                    Err(e) => {
                        // the current job may have been relayed; it stays claimed
                        // until the stale-claim sweep settles it
                        self.release_unsent(campaign.id, &batch[i + 1..]).await;
                        return Err(e);
                    }
                }
            }
        }

        self.finalize(campaign.id).await
    }

    async fn still_pending(&self, campaign_id: CampaignId, job: &QueueJob) -> Result<bool> {
        let record = self
            .repos
            .records
            .get(campaign_id, job.subscriber_id)
            .await?;
        Ok(record.is_some_and(|r| r.status_enum() == Some(DeliveryStatus::Pending)))
    }

    /// Recipient left the campaign after being enqueued
    async fn drop_job(&self, campaign_id: CampaignId, job: &QueueJob) -> Result<Delivery> {
        debug!(
            campaign_id = %campaign_id,
            subscriber_id = %job.subscriber_id,
            "Recipient no longer pending, skipping"
        );
        if self.repos.jobs.fail(job.id, "recipient unsubscribed").await? {
            self.counters.failed();
        }
        Ok(Delivery::Dropped)
    }

    /// Hand never-attempted claims back to the queue after a storage error
    async fn release_unsent(&self, campaign_id: CampaignId, jobs: &[QueueJob]) {
        let ids: Vec<QueueJobId> = jobs.iter().map(|j| j.id).collect();
        match self.repos.jobs.release(&ids).await {
            Ok(released) => self.counters.released(released),
            Err(e) => warn!(
                campaign_id = %campaign_id,
                error = %e,
                "Failed to release claimed jobs"
            ),
        }
    }

    async fn deliver(&self, campaign: &Campaign, job: &QueueJob) -> Result<Delivery> {
        let rendered = self.renderer.render(campaign, job);
        let message = OutgoingMessage {
            from_address: campaign
                .from_address
                .clone()
                .unwrap_or_else(|| self.from_address.clone()),
            from_name: campaign.from_name.clone().or_else(|| self.from_name.clone()),
            to_address: job.email.clone(),
            to_name: job.name.clone(),
            subject: rendered.subject,
            html_body: rendered.html_body,
            text_body: rendered.text_body,
            list_unsubscribe: rendered.list_unsubscribe,
        };

        let result = match tokio::time::timeout(self.send_timeout, self.transport.send(&message)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.send_timeout)),
        };

        match result {
            Ok(message_id) => {
                if self
                    .repos
                    .records
                    .mark_sent(campaign.id, job.subscriber_id, Utc::now())
                    .await?
                {
                    self.metrics.emails_sent.inc();
                }
                if self.repos.jobs.complete(job.id).await? {
                    self.counters.completed();
                }
                debug!(
                    campaign_id = %campaign.id,
                    to = %job.email,
                    message_id = %message_id,
                    "Message sent"
                );
                Ok(Delivery::Sent)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    campaign_id = %campaign.id,
                    to = %job.email,
                    error = %reason,
                    "Message failed"
                );
                if self
                    .repos
                    .records
                    .mark_failed(campaign.id, job.subscriber_id, &reason, Utc::now())
                    .await?
                {
                    self.metrics.emails_failed.inc();
                }
                if self.repos.jobs.fail(job.id, &reason).await? {
                    self.counters.failed();
                }
                Ok(Delivery::Failed)
            }
        }
    }

    /// Stop draining: drop the queue of a cancelled campaign, or hand claimed
    /// jobs back to the queue on shutdown
    async fn halted(&self, campaign_id: CampaignId, unsent: &[QueueJobId]) -> Result<DrainOutcome> {
        let status = self
            .repos
            .campaigns
            .get(campaign_id)
            .await?
            .and_then(|c| c.status_enum());

        if status == Some(CampaignStatus::Cancelled) {
            let dropped = self.repos.jobs.discard_campaign(campaign_id).await?;
            self.counters.discarded(dropped);
            self.manager.release(campaign_id);
            info!(
                campaign_id = %campaign_id,
                discarded = dropped.total(),
                "Stopped draining cancelled campaign"
            );
            return Ok(DrainOutcome::Cancelled);
        }

        let released = self.repos.jobs.release(unsent).await?;
        self.counters.released(released);
        info!(
            campaign_id = %campaign_id,
            released,
            "Drain interrupted by shutdown"
        );
        Ok(DrainOutcome::Interrupted)
    }

    /// Queue exhausted: SENT, or ERROR when too many sends failed
    async fn finalize(&self, campaign_id: CampaignId) -> Result<DrainOutcome> {
        let Some(campaign) = self.repos.campaigns.get(campaign_id).await? else {
            return Ok(DrainOutcome::Skipped);
        };

        match campaign.status_enum() {
            Some(CampaignStatus::Sending) => {}
            Some(CampaignStatus::Cancelled) => return self.halted(campaign_id, &[]).await,
            _ => return Ok(DrainOutcome::Skipped),
        }

        let outstanding = self.repos.jobs.outstanding_count(campaign_id).await?;
        if outstanding > 0 {
            debug!(
                campaign_id = %campaign_id,
                outstanding,
                "Claimed jobs not settled yet, deferring completion"
            );
            return Ok(DrainOutcome::Waiting);
        }

        let ratio = campaign.failure_ratio();
        let target = if ratio > self.failure_threshold {
            CampaignStatus::Error
        } else {
            CampaignStatus::Sent
        };

        let Some(finished) = self
            .repos
            .campaigns
            .transition(campaign_id, &[CampaignStatus::Sending], target)
            .await?
        else {
            return Ok(DrainOutcome::Skipped);
        };

        self.repos.jobs.purge_campaign(campaign_id).await?;
        self.manager.release(campaign_id);

        if target == CampaignStatus::Error {
            error!(
                campaign_id = %campaign_id,
                sent = finished.total_sent,
                failed = finished.total_failed,
                failure_ratio = ratio,
                "Campaign failed: failure ratio above threshold"
            );
        } else {
            info!(
                campaign_id = %campaign_id,
                sent = finished.total_sent,
                failed = finished.total_failed,
                "Campaign sent"
            );
        }

        Ok(DrainOutcome::Finished(target))
    }
}
