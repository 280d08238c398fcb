//! Campaign Manager - Handles campaign lifecycle transitions

use crate::queue::QueueCounters;
use chrono::{DateTime, Utc};
use gazette_common::types::{CampaignId, EmailAddress};
use gazette_storage::models::{Campaign, CampaignStatus, CreateCampaign, Recipient};
use gazette_storage::repository::Repositories;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Campaign manager errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign is {status}; this operation requires {expected}")]
    InvalidState {
        status: String,
        expected: &'static str,
    },

    #[error("No deliverable recipients after removing unsubscribed subscribers")]
    EmptyRecipientList,

    #[error("Campaign is scheduled for {0}")]
    NotYetDue(DateTime<Utc>),

    #[error("Invalid campaign: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] gazette_common::Error),
}

impl CampaignError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CampaignError::NotFound => 404,
            CampaignError::InvalidState { .. } => 409,
            CampaignError::EmptyRecipientList
            | CampaignError::NotYetDue(_)
            | CampaignError::Validation(_) => 422,
            CampaignError::Storage(e) => e.status_code(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::NotFound => "NOT_FOUND",
            CampaignError::InvalidState { .. } => "INVALID_STATE",
            CampaignError::EmptyRecipientList => "EMPTY_RECIPIENT_LIST",
            CampaignError::NotYetDue(_) => "NOT_YET_DUE",
            CampaignError::Validation(_) => "VALIDATION_ERROR",
            CampaignError::Storage(e) => e.code(),
        }
    }

    fn invalid_state(campaign: &Campaign, expected: &'static str) -> Self {
        CampaignError::InvalidState {
            status: campaign.status.clone(),
            expected,
        }
    }
}

/// Per-campaign cancellation signals, children of the process shutdown token
#[derive(Default)]
struct CancellationRegistry {
    root: CancellationToken,
    tokens: Mutex<HashMap<CampaignId, CancellationToken>>,
}

impl CancellationRegistry {
    fn token(&self, id: CampaignId) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens
            .entry(id)
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    fn cancel(&self, id: CampaignId) {
        self.token(id).cancel();
    }

    fn release(&self, id: CampaignId) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&id);
    }
}

/// Campaign Manager - Manages campaign lifecycle
pub struct CampaignManager {
    repos: Repositories,
    counters: Arc<QueueCounters>,
    cancellations: CancellationRegistry,
    /// Serialises starts so a campaign is never enqueued twice by this process
    start_lock: tokio::sync::Mutex<()>,
}

impl CampaignManager {
    pub fn new(repos: Repositories, counters: Arc<QueueCounters>) -> Self {
        Self {
            repos,
            counters,
            cancellations: CancellationRegistry::default(),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Tie every campaign cancellation signal to a process-wide shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.cancellations.root = shutdown;
        self
    }

    /// Create a DRAFT campaign
    pub async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign, CampaignError> {
        for (field, value) in [
            ("title", &input.title),
            ("subject", &input.subject),
            ("html_body", &input.html_body),
        ] {
            if value.trim().is_empty() {
                return Err(CampaignError::Validation(format!("{} must not be empty", field)));
            }
        }
        if let Some(from) = &input.from_address {
            if EmailAddress::parse(from).is_none() {
                return Err(CampaignError::Validation(format!(
                    "Invalid sender address: {}",
                    from
                )));
            }
        }

        let campaign = self.repos.campaigns.create(input).await?;
        info!(campaign_id = %campaign.id, title = %campaign.title, "Campaign created");
        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        self.repos
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    pub async fn list_campaigns(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.repos.campaigns.list(limit, offset).await?)
    }

    /// Enqueue a DRAFT or due SCHEDULED campaign and move it to SENDING
    pub async fn start_campaign(
        &self,
        campaign_id: CampaignId,
        recipients: Vec<Recipient>,
    ) -> Result<Campaign, CampaignError> {
        self.start_at(campaign_id, recipients, Utc::now()).await
    }

    /// Start as seen at `now`; a SCHEDULED campaign is due once `scheduled_at <= now`
    async fn start_at(
        &self,
        campaign_id: CampaignId,
        recipients: Vec<Recipient>,
        now: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        let _guard = self.start_lock.lock().await;

        let campaign = self.get_campaign(campaign_id).await?;
        match campaign.status_enum() {
            Some(CampaignStatus::Draft) => {}
            Some(CampaignStatus::Scheduled) => {
                if let Some(at) = campaign.scheduled_at.filter(|at| *at > now) {
                    return Err(CampaignError::NotYetDue(at));
                }
            }
            _ => return Err(CampaignError::invalid_state(&campaign, "draft or scheduled")),
        }

        let recipients = self.deliverable(recipients).await?;
        if recipients.is_empty() {
            return Err(CampaignError::EmptyRecipientList);
        }

        let total = recipients.len();
        self.repos
            .records
            .create_pending(campaign_id, &recipients)
            .await?;
        let enqueued = self.repos.jobs.enqueue(campaign_id, &recipients).await?;
        self.repos
            .campaigns
            .set_total_recipients(campaign_id, total as i32)
            .await?;

        let started = self
            .repos
            .campaigns
            .transition(
                campaign_id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Sending,
            )
            .await?;

        let Some(started) = started else {
            // another process moved it first; undo this enqueue
            self.repos.jobs.purge_campaign(campaign_id).await?;
            self.repos.records.delete_by_campaign(campaign_id).await?;
            self.repos
                .campaigns
                .set_total_recipients(campaign_id, 0)
                .await?;
            let current = self.get_campaign(campaign_id).await?;
            return Err(CampaignError::invalid_state(&current, "draft or scheduled"));
        };

        self.counters.enqueued(enqueued);

        info!(
            campaign_id = %campaign_id,
            recipients = total,
            "Campaign started sending"
        );

        Ok(started)
    }

    /// Park the recipients and move a DRAFT campaign to SCHEDULED
    pub async fn schedule_campaign(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
        recipients: Vec<Recipient>,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(campaign_id).await?;
        if campaign.status_enum() != Some(CampaignStatus::Draft) {
            return Err(CampaignError::invalid_state(&campaign, "draft"));
        }

        let recipients = dedupe(recipients);
        validate_addresses(&recipients)?;
        if recipients.iter().all(|r| r.unsubscribed) {
            return Err(CampaignError::EmptyRecipientList);
        }

        match self
            .repos
            .campaigns
            .schedule(campaign_id, at, &recipients)
            .await?
        {
            Some(scheduled) => {
                info!(
                    campaign_id = %campaign_id,
                    scheduled_at = %at,
                    recipients = recipients.len(),
                    "Campaign scheduled"
                );
                Ok(scheduled)
            }
            None => {
                let current = self.get_campaign(campaign_id).await?;
                Err(CampaignError::invalid_state(&current, "draft"))
            }
        }
    }

    /// Halt a SCHEDULED or SENDING campaign; already-cancelled campaigns are returned as is
    pub async fn cancel_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(campaign_id).await?;
        match campaign.status_enum() {
            Some(CampaignStatus::Cancelled) => return Ok(campaign),
            Some(CampaignStatus::Scheduled | CampaignStatus::Sending) => {}
            _ => return Err(CampaignError::invalid_state(&campaign, "scheduled or sending")),
        }

        let cancelled = self
            .repos
            .campaigns
            .transition(
                campaign_id,
                &[CampaignStatus::Scheduled, CampaignStatus::Sending],
                CampaignStatus::Cancelled,
            )
            .await?;

        let cancelled = match cancelled {
            Some(cancelled) => cancelled,
            None => {
                // raced with the worker finishing or another cancel
                let current = self.get_campaign(campaign_id).await?;
                if current.status_enum() == Some(CampaignStatus::Cancelled) {
                    return Ok(current);
                }
                return Err(CampaignError::invalid_state(&current, "scheduled or sending"));
            }
        };

        self.cancellations.cancel(campaign_id);
        if campaign.status_enum() == Some(CampaignStatus::Scheduled) {
            // never drained, so the worker will not release it
            self.cancellations.release(campaign_id);
        }

        let dropped = self.repos.jobs.discard_campaign(campaign_id).await?;
        self.counters.discarded(dropped);

        info!(
            campaign_id = %campaign_id,
            discarded = dropped.total(),
            sent = cancelled.total_sent,
            "Campaign cancelled"
        );

        Ok(cancelled)
    }

    /// Start every SCHEDULED campaign due at `now`. A campaign that cannot be
    /// promoted is logged and left for the next poll.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<CampaignId>, CampaignError> {
        let mut promoted = Vec::new();

        for campaign in self.repos.campaigns.list_due(now).await? {
            match self.promote(campaign.id, now).await {
                Ok(true) => promoted.push(campaign.id),
                Ok(false) => {}
                Err(e) => error!(
                    campaign_id = %campaign.id,
                    error = %e,
                    "Failed to promote scheduled campaign"
                ),
            }
        }

        Ok(promoted)
    }

    async fn promote(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> Result<bool, CampaignError> {
        let recipients = self.repos.campaigns.scheduled_recipients(campaign_id).await?;

        match self.start_at(campaign_id, recipients, now).await {
            Ok(_) => Ok(true),
            Err(CampaignError::EmptyRecipientList) => {
                warn!(
                    campaign_id = %campaign_id,
                    "Scheduled campaign has no deliverable recipients left"
                );
                self.repos
                    .campaigns
                    .transition(campaign_id, &[CampaignStatus::Scheduled], CampaignStatus::Error)
                    .await?;
                self.release(campaign_id);
                Ok(false)
            }
            Err(CampaignError::InvalidState { status, .. }) => {
                debug!(campaign_id = %campaign_id, %status, "Scheduled campaign already moved on");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancellation signal observed by the worker while draining a campaign
    pub fn cancellation_token(&self, campaign_id: CampaignId) -> CancellationToken {
        self.cancellations.token(campaign_id)
    }

    /// Forget the signal of a campaign that reached a terminal status
    pub fn release(&self, campaign_id: CampaignId) {
        self.cancellations.release(campaign_id);
    }

    #[cfg(test)]
    fn tracked_signals(&self) -> usize {
        self.cancellations
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Drop duplicates, unsubscribed and suppressed subscribers
    async fn deliverable(&self, recipients: Vec<Recipient>) -> Result<Vec<Recipient>, CampaignError> {
        let recipients = dedupe(recipients);
        validate_addresses(&recipients)?;

        let ids: Vec<_> = recipients.iter().map(|r| r.subscriber_id).collect();
        let suppressed: HashSet<_> = self
            .repos
            .records
            .suppressed(&ids)
            .await?
            .into_iter()
            .collect();

        let before = recipients.len();
        let deliverable: Vec<Recipient> = recipients
            .into_iter()
            .filter(|r| !r.unsubscribed && !suppressed.contains(&r.subscriber_id))
            .collect();

        if deliverable.len() < before {
            debug!(
                skipped = before - deliverable.len(),
                "Removed unsubscribed recipients"
            );
        }

        Ok(deliverable)
    }
}

/// Keep the first occurrence of each subscriber
fn dedupe(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert(r.subscriber_id))
        .collect()
}

fn validate_addresses(recipients: &[Recipient]) -> Result<(), CampaignError> {
    match recipients
        .iter()
        .find(|r| EmailAddress::parse(&r.email).is_none())
    {
        Some(bad) => Err(CampaignError::Validation(format!(
            "Invalid recipient address: {}",
            bad.email
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gazette_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn manager() -> (CampaignManager, Repositories, Arc<QueueCounters>) {
        let repos = Repositories::memory(MemoryStore::new());
        let counters = Arc::new(QueueCounters::new());
        (
            CampaignManager::new(repos.clone(), counters.clone()),
            repos,
            counters,
        )
    }

    fn input() -> CreateCampaign {
        CreateCampaign {
            title: "Concert de jazz".to_string(),
            subject: "Ce vendredi au kiosque".to_string(),
            html_body: "<body><p>Entrée libre</p></body>".to_string(),
            text_body: None,
            from_address: Some("infos@annuaire.example".to_string()),
            from_name: None,
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                subscriber_id: Uuid::new_v4(),
                email: format!("voisin{}@rue.example", i),
                name: None,
                unsubscribed: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_enqueues_deliverable_recipients() {
        let (manager, repos, counters) = manager();
        let campaign = manager.create_campaign(input()).await.unwrap();

        let mut list = recipients(4);
        list[1].unsubscribed = true;
        list.push(list[0].clone());

        let started = manager.start_campaign(campaign.id, list).await.unwrap();
        assert_eq!(started.status_enum(), Some(CampaignStatus::Sending));
        assert_eq!(started.total_recipients, 3);
        assert!(started.started_at.is_some());

        assert_eq!(repos.jobs.pending_count(campaign.id).await.unwrap(), 3);
        assert_eq!(repos.records.counts(campaign.id).await.unwrap().pending, 3);
        assert_eq!(counters.snapshot().pending, 3);
    }

    #[tokio::test]
    async fn test_start_rejections_have_no_side_effects() {
        let (manager, repos, _) = manager();
        let campaign = manager.create_campaign(input()).await.unwrap();

        let mut all_out = recipients(2);
        all_out.iter_mut().for_each(|r| r.unsubscribed = true);
        assert!(matches!(
            manager.start_campaign(campaign.id, all_out).await,
            Err(CampaignError::EmptyRecipientList)
        ));
        assert!(matches!(
            manager.start_campaign(campaign.id, Vec::new()).await,
            Err(CampaignError::EmptyRecipientList)
        ));

        let mut bad = recipients(2);
        bad[1].email = "pas-une-adresse".to_string();
        assert!(matches!(
            manager.start_campaign(campaign.id, bad).await,
            Err(CampaignError::Validation(_))
        ));

        assert_eq!(repos.records.counts(campaign.id).await.unwrap().pending, 0);
        let unchanged = manager.get_campaign(campaign.id).await.unwrap();
        assert_eq!(unchanged.status_enum(), Some(CampaignStatus::Draft));

        assert!(matches!(
            manager.start_campaign(Uuid::new_v4(), recipients(1)).await,
            Err(CampaignError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let (manager, _, _) = manager();
        let campaign = manager.create_campaign(input()).await.unwrap();
        manager
            .start_campaign(campaign.id, recipients(2))
            .await
            .unwrap();

        let err = manager
            .start_campaign(campaign.id, recipients(2))
            .await
            .unwrap_err();
        match err {
            CampaignError::InvalidState { status, .. } => assert_eq!(status, "sending"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_suppressed_subscriber_skipped_in_later_campaign() {
        let (manager, repos, _) = manager();
        let first = manager.create_campaign(input()).await.unwrap();
        let list = recipients(2);
        manager.start_campaign(first.id, list.clone()).await.unwrap();
        repos
            .records
            .record_unsubscribe(first.id, list[0].subscriber_id, Utc::now())
            .await
            .unwrap();

        let second = manager.create_campaign(input()).await.unwrap();
        let started = manager.start_campaign(second.id, list).await.unwrap();
        assert_eq!(started.total_recipients, 1);
    }

    #[tokio::test]
    async fn test_schedule_and_promote() {
        let (manager, _, _) = manager();
        let campaign = manager.create_campaign(input()).await.unwrap();

        let later = Utc::now() + Duration::hours(2);
        manager
            .schedule_campaign(campaign.id, later, recipients(3))
            .await
            .unwrap();

        assert!(matches!(
            manager.start_campaign(campaign.id, recipients(1)).await,
            Err(CampaignError::NotYetDue(_))
        ));
        assert!(manager.promote_due(Utc::now()).await.unwrap().is_empty());

        let promoted = manager
            .promote_due(later + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(promoted, vec![campaign.id]);

        let sending = manager.get_campaign(campaign.id).await.unwrap();
        assert_eq!(sending.status_enum(), Some(CampaignStatus::Sending));
        assert_eq!(sending.total_recipients, 3);
    }

    #[tokio::test]
    async fn test_cancel_transitions() {
        let (manager, repos, counters) = manager();

        let draft = manager.create_campaign(input()).await.unwrap();
        assert!(matches!(
            manager.cancel_campaign(draft.id).await,
            Err(CampaignError::InvalidState { .. })
        ));

        let campaign = manager.create_campaign(input()).await.unwrap();
        manager
            .start_campaign(campaign.id, recipients(5))
            .await
            .unwrap();
        let token = manager.cancellation_token(campaign.id);

        let cancelled = manager.cancel_campaign(campaign.id).await.unwrap();
        assert_eq!(cancelled.status_enum(), Some(CampaignStatus::Cancelled));
        assert!(token.is_cancelled());
        assert_eq!(repos.jobs.pending_count(campaign.id).await.unwrap(), 0);
        assert_eq!(counters.snapshot().pending, 0);

        // idempotent
        let again = manager.cancel_campaign(campaign.id).await.unwrap();
        assert_eq!(again.status_enum(), Some(CampaignStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_promotion_failure_does_not_block_other_campaigns() {
        let (manager, repos, _) = manager();
        let at = Utc::now() + Duration::minutes(5);

        let mut broken = recipients(1);
        broken[0].email = "pas-une-adresse".to_string();
        let first = manager.create_campaign(input()).await.unwrap();
        repos
            .campaigns
            .schedule(first.id, at, &broken)
            .await
            .unwrap()
            .unwrap();

        let second = manager.create_campaign(input()).await.unwrap();
        manager
            .schedule_campaign(second.id, at + Duration::seconds(1), recipients(2))
            .await
            .unwrap();

        let promoted = manager
            .promote_due(at + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(promoted, vec![second.id]);

        let stuck = manager.get_campaign(first.id).await.unwrap();
        assert_eq!(stuck.status_enum(), Some(CampaignStatus::Scheduled));
    }

    #[tokio::test]
    async fn test_cancel_scheduled_releases_signal() {
        let (manager, _, _) = manager();
        let campaign = manager.create_campaign(input()).await.unwrap();
        manager
            .schedule_campaign(campaign.id, Utc::now() + Duration::hours(1), recipients(2))
            .await
            .unwrap();

        let cancelled = manager.cancel_campaign(campaign.id).await.unwrap();
        assert_eq!(cancelled.status_enum(), Some(CampaignStatus::Cancelled));
        assert_eq!(manager.tracked_signals(), 0);
    }

    #[test]
    fn test_shutdown_cancels_campaign_tokens() {
        let shutdown = CancellationToken::new();
        let (manager, _, _) = manager();
        let manager = manager.with_shutdown(shutdown.clone());

        let token = manager.cancellation_token(Uuid::new_v4());
        shutdown.cancel();
        assert!(token.is_cancelled());
    }
}
