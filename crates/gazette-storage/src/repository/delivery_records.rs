//! Delivery record repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gazette_common::types::{CampaignId, SubscriberId};
use gazette_common::Result;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::db::{db_error, DatabasePool};
use crate::models::{
    ActivityAction, ActivityEntry, DeliveryCounts, DeliveryRecord, Recipient, TrackingOutcome,
};

/// Delivery record repository trait
#[async_trait]
pub trait DeliveryRecordRepository: Send + Sync {
    /// Create one pending record per recipient; existing pairs are left untouched.
    /// Returns the number of records created.
    async fn create_pending(&self, campaign_id: CampaignId, recipients: &[Recipient])
        -> Result<u64>;
    async fn get(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<Option<DeliveryRecord>>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DeliveryRecord>>;
    /// pending -> sent, bumping the campaign's sent counter. False if the record was not pending.
    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    /// pending -> failed, bumping the campaign's failed counter. False if the record was not pending.
    async fn mark_failed(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Set the first open on a sent record
    async fn record_open(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome>;
    /// Set the first click on a sent record
    async fn record_click(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome>;
    /// Set the unsubscribe fact; a still-pending record will never be sent
    async fn record_unsubscribe(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome>;
    async fn counts(&self, campaign_id: CampaignId) -> Result<DeliveryCounts>;
    /// Latest opens and clicks, newest first
    async fn recent_activity(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>>;
    /// Subset of `subscriber_ids` that unsubscribed from any campaign
    async fn suppressed(&self, subscriber_ids: &[SubscriberId]) -> Result<Vec<SubscriberId>>;
    async fn delete_by_campaign(&self, campaign_id: CampaignId) -> Result<u64>;
}

/// Database delivery record repository
#[derive(Clone)]
pub struct DbDeliveryRecordRepository {
    pool: DatabasePool,
}

impl DbDeliveryRecordRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Tell apart why a conditional update touched no row
    async fn classify_miss(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<TrackingOutcome> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM delivery_records WHERE campaign_id = $1 AND subscriber_id = $2",
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?;

        Ok(match status.as_deref() {
            None => TrackingOutcome::Unknown,
            Some("sent") => TrackingOutcome::Duplicate,
            Some(_) => TrackingOutcome::NotSent,
        })
    }

    /// Conditional first-engagement update plus the matching campaign counter
    async fn record_engagement(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
        column: &'static str,
        counter: &'static str,
    ) -> Result<TrackingOutcome> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let update = format!(
            "UPDATE delivery_records SET {column} = $3 \
             WHERE campaign_id = $1 AND subscriber_id = $2 \
               AND status = 'sent' AND {column} IS NULL"
        );
        let result = sqlx::query(&update)
            .bind(campaign_id)
            .bind(subscriber_id)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            let outcome = Self::classify_miss(&mut tx, campaign_id, subscriber_id).await?;
            tx.rollback().await.map_err(db_error)?;
            return Ok(outcome);
        }

        let bump = format!(
            "UPDATE campaigns SET {counter} = {counter} + 1, updated_at = NOW() WHERE id = $1"
        );
        sqlx::query(&bump)
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(TrackingOutcome::Recorded)
    }
}

#[async_trait]
impl DeliveryRecordRepository for DbDeliveryRecordRepository {
    async fn create_pending(
        &self,
        campaign_id: CampaignId,
        recipients: &[Recipient],
    ) -> Result<u64> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;
        let mut created = 0;

        for recipient in recipients {
            let result = sqlx::query(
                r#"
                INSERT INTO delivery_records (id, campaign_id, subscriber_id, email, name, status)
                VALUES ($1, $2, $3, $4, $5, 'pending')
                ON CONFLICT (campaign_id, subscriber_id) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign_id)
            .bind(recipient.subscriber_id)
            .bind(&recipient.email)
            .bind(&recipient.name)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            created += result.rows_affected();
        }

        tx.commit().await.map_err(db_error)?;
        Ok(created)
    }

    async fn get(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<Option<DeliveryRecord>> {
        sqlx::query_as::<_, DeliveryRecord>(
            "SELECT * FROM delivery_records WHERE campaign_id = $1 AND subscriber_id = $2",
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DeliveryRecord>> {
        sqlx::query_as::<_, DeliveryRecord>(
            "SELECT * FROM delivery_records WHERE campaign_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let result = sqlx::query(
            r#"
            UPDATE delivery_records SET status = 'sent', sent_at = $3
            WHERE campaign_id = $1 AND subscriber_id = $2 AND status = 'pending'
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE campaigns SET total_sent = total_sent + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(campaign_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn mark_failed(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let result = sqlx::query(
            r#"
            UPDATE delivery_records SET status = 'failed', failure_reason = $3, failed_at = $4
            WHERE campaign_id = $1 AND subscriber_id = $2 AND status = 'pending'
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(reason)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE campaigns SET total_failed = total_failed + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(campaign_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn record_open(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        self.record_engagement(campaign_id, subscriber_id, at, "first_opened_at", "total_opened")
            .await
    }

    async fn record_click(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        self.record_engagement(
            campaign_id,
            subscriber_id,
            at,
            "first_clicked_at",
            "total_clicked",
        )
        .await
    }

    async fn record_unsubscribe(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_records SET
                unsubscribed_at = $3,
                status = CASE WHEN status = 'pending' THEN 'unsubscribed' ELSE status END
            WHERE campaign_id = $1 AND subscriber_id = $2 AND unsubscribed_at IS NULL
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(TrackingOutcome::Recorded);
        }

        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM delivery_records WHERE campaign_id = $1 AND subscriber_id = $2",
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(if exists.is_some() {
            TrackingOutcome::Duplicate
        } else {
            TrackingOutcome::Unknown
        })
    }

    async fn counts(&self, campaign_id: CampaignId) -> Result<DeliveryCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sent') AS delivered,
                COUNT(*) FILTER (WHERE first_opened_at IS NOT NULL) AS opened,
                COUNT(*) FILTER (WHERE first_clicked_at IS NOT NULL) AS clicked,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE unsubscribed_at IS NOT NULL) AS unsubscribed
            FROM delivery_records
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(DeliveryCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            delivered: row.get::<Option<i64>, _>("delivered").unwrap_or(0),
            opened: row.get::<Option<i64>, _>("opened").unwrap_or(0),
            clicked: row.get::<Option<i64>, _>("clicked").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            unsubscribed: row.get::<Option<i64>, _>("unsubscribed").unwrap_or(0),
        })
    }

    async fn recent_activity(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT subscriber_id, email, name, 'opened' AS action, first_opened_at AS occurred_at
            FROM delivery_records
            WHERE campaign_id = $1 AND first_opened_at IS NOT NULL
            UNION ALL
            SELECT subscriber_id, email, name, 'clicked' AS action, first_clicked_at AS occurred_at
            FROM delivery_records
            WHERE campaign_id = $1 AND first_clicked_at IS NOT NULL
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let action: String = row.get("action");
                ActivityEntry {
                    subscriber_id: row.get("subscriber_id"),
                    email: row.get("email"),
                    name: row.get("name"),
                    action: if action == "clicked" {
                        ActivityAction::Clicked
                    } else {
                        ActivityAction::Opened
                    },
                    timestamp: row.get("occurred_at"),
                }
            })
            .collect())
    }

    async fn suppressed(&self, subscriber_ids: &[SubscriberId]) -> Result<Vec<SubscriberId>> {
        if subscriber_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_scalar(
            r#"
            SELECT DISTINCT subscriber_id FROM delivery_records
            WHERE subscriber_id = ANY($1) AND unsubscribed_at IS NOT NULL
            "#,
        )
        .bind(subscriber_ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn delete_by_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM delivery_records WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
