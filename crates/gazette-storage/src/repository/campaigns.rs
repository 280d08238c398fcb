//! Campaign repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gazette_common::types::CampaignId;
use gazette_common::Result;
use uuid::Uuid;

use crate::db::{db_error, DatabasePool};
use crate::models::{Campaign, CampaignStatus, CreateCampaign, Recipient};

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>>;
    /// Campaigns in a status, oldest start first
    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;
    /// Scheduled campaigns whose time has come
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;
    /// Move a campaign to `to` only if its current status is one of `from`.
    /// Returns `None` when the campaign is missing or in another status.
    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>>;
    /// DRAFT -> SCHEDULED, parking the resolved recipients until the due time
    async fn schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
        recipients: &[Recipient],
    ) -> Result<Option<Campaign>>;
    async fn scheduled_recipients(&self, id: CampaignId) -> Result<Vec<Recipient>>;
    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()>;
}

/// Database campaign repository
#[derive(Clone)]
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, title, subject, html_body, text_body, from_address, from_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.title)
        .bind(&input.subject)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(&input.from_address)
        .bind(&input.from_name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = $1
            ORDER BY started_at ASC NULLS LAST, created_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let now = Utc::now();
        let started_at = (to == CampaignStatus::Sending).then_some(now);
        let sent_at = (to == CampaignStatus::Sent).then_some(now);
        let from: Vec<String> = from.iter().map(|s| s.to_string()).collect();

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = COALESCE(started_at, $3),
                sent_at = COALESCE($4, sent_at),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(started_at)
        .bind(sent_at)
        .bind(&from)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
        recipients: &[Recipient],
    ) -> Result<Option<Campaign>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'scheduled',
                scheduled_at = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(campaign) = campaign else {
            return Ok(None);
        };

        for recipient in recipients {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (campaign_id, subscriber_id, email, name, unsubscribed)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (campaign_id, subscriber_id) DO UPDATE SET
                    email = EXCLUDED.email,
                    name = EXCLUDED.name,
                    unsubscribed = EXCLUDED.unsubscribed
                "#,
            )
            .bind(id)
            .bind(recipient.subscriber_id)
            .bind(&recipient.email)
            .bind(&recipient.name)
            .bind(recipient.unsubscribed)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(Some(campaign))
    }

    async fn scheduled_recipients(&self, id: CampaignId) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT subscriber_id, email, name, unsubscribed
            FROM campaign_recipients
            WHERE campaign_id = $1
            ORDER BY email ASC
            "#,
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                total_recipients = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
