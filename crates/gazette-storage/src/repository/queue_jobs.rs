//! Queue job repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gazette_common::types::{CampaignId, QueueJobId, SubscriberId};
use gazette_common::Result;
use sqlx::Row;
use uuid::Uuid;

use crate::db::{db_error, DatabasePool};
use crate::models::{QueueJob, QueueJobStatus, QueueStatusCounts, Recipient};

/// Queue job repository trait
#[async_trait]
pub trait QueueJobRepository: Send + Sync {
    /// Enqueue one pending job per recipient, in list order
    async fn enqueue(&self, campaign_id: CampaignId, recipients: &[Recipient]) -> Result<u64>;
    /// Atomically move up to `limit` pending jobs to processing, lowest position first
    async fn claim_batch(&self, campaign_id: CampaignId, limit: usize) -> Result<Vec<QueueJob>>;
    /// processing -> completed
    async fn complete(&self, job_id: QueueJobId) -> Result<bool>;
    /// processing -> failed
    async fn fail(&self, job_id: QueueJobId, error: &str) -> Result<bool>;
    /// processing -> pending, for jobs claimed but never attempted
    async fn release(&self, job_ids: &[QueueJobId]) -> Result<u64>;
    /// Drop every pending and processing job of a campaign; returns what was dropped
    async fn discard_campaign(&self, campaign_id: CampaignId) -> Result<QueueStatusCounts>;
    /// Drop pending jobs of a subscriber across all campaigns. The delivery
    /// records behind the dropped jobs move from pending to unsubscribed.
    async fn discard_subscriber(
        &self,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<QueueStatusCounts>;
    /// Archive a finished campaign's jobs
    async fn purge_campaign(&self, campaign_id: CampaignId) -> Result<u64>;
    async fn pending_count(&self, campaign_id: CampaignId) -> Result<u64>;
    /// Pending plus processing jobs of a campaign
    async fn outstanding_count(&self, campaign_id: CampaignId) -> Result<u64>;
    /// Processing jobs claimed at or before `claimed_before`
    async fn list_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<QueueJob>>;
    /// Job counts across all campaigns
    async fn status_counts(&self) -> Result<QueueStatusCounts>;
}

/// Database queue job repository
#[derive(Clone)]
pub struct DbQueueJobRepository {
    pool: DatabasePool,
}

impl DbQueueJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn collect_counts(rows: Vec<sqlx::postgres::PgRow>) -> QueueStatusCounts {
    let mut counts = QueueStatusCounts::default();
    for row in rows {
        let status: String = row.get("status");
        let n: i64 = row.get::<Option<i64>, _>("count").unwrap_or(0);
        if let Ok(status) = status.parse::<QueueJobStatus>() {
            counts.add(status, n.max(0) as u64);
        }
    }
    counts
}

#[async_trait]
impl QueueJobRepository for DbQueueJobRepository {
    async fn enqueue(&self, campaign_id: CampaignId, recipients: &[Recipient]) -> Result<u64> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;
        let mut created = 0;

        for (position, recipient) in recipients.iter().enumerate() {
            let result = sqlx::query(
                r#"
                INSERT INTO queue_jobs (id, campaign_id, subscriber_id, email, name, position, status)
                VALUES ($1, $2, $3, $4, $5, $6, 'pending')
                ON CONFLICT (campaign_id, subscriber_id) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign_id)
            .bind(recipient.subscriber_id)
            .bind(&recipient.email)
            .bind(&recipient.name)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            created += result.rows_affected();
        }

        tx.commit().await.map_err(db_error)?;
        Ok(created)
    }

    async fn claim_batch(&self, campaign_id: CampaignId, limit: usize) -> Result<Vec<QueueJob>> {
        let mut jobs = sqlx::query_as::<_, QueueJob>(
            r#"
            UPDATE queue_jobs SET status = 'processing', claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM queue_jobs
                WHERE campaign_id = $1 AND status = 'pending'
                ORDER BY position ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(campaign_id)
        .bind(limit as i64)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;

        // RETURNING does not preserve the subquery order
        jobs.sort_by_key(|job| job.position);
        Ok(jobs)
    }

    async fn complete(&self, job_id: QueueJobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET status = 'completed', finished_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, job_id: QueueJobId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET status = 'failed', last_error = $2, finished_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, job_ids: &[QueueJobId]) -> Result<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE queue_jobs SET status = 'pending', claimed_at = NULL
            WHERE id = ANY($1) AND status = 'processing'
            "#,
        )
        .bind(job_ids)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn discard_campaign(&self, campaign_id: CampaignId) -> Result<QueueStatusCounts> {
        let rows = sqlx::query(
            r#"
            WITH dropped AS (
                DELETE FROM queue_jobs
                WHERE campaign_id = $1 AND status IN ('pending', 'processing')
                RETURNING status
            )
            SELECT status, COUNT(*) AS count FROM dropped GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(collect_counts(rows))
    }

    async fn discard_subscriber(
        &self,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<QueueStatusCounts> {
        let rows = sqlx::query(
            r#"
            WITH dropped AS (
                DELETE FROM queue_jobs
                WHERE subscriber_id = $1 AND status = 'pending'
                RETURNING campaign_id, status
            ),
            marked AS (
                UPDATE delivery_records SET status = 'unsubscribed', unsubscribed_at = $2
                WHERE subscriber_id = $1 AND status = 'pending'
                  AND campaign_id IN (SELECT campaign_id FROM dropped)
                RETURNING id
            )
            SELECT status, COUNT(*) AS count FROM dropped GROUP BY status
            "#,
        )
        .bind(subscriber_id)
        .bind(at)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(collect_counts(rows))
    }

    async fn purge_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self, campaign_id: CampaignId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_jobs WHERE campaign_id = $1 AND status = 'pending'",
        )
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn outstanding_count(&self, campaign_id: CampaignId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM queue_jobs
            WHERE campaign_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn list_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<QueueJob>> {
        sqlx::query_as::<_, QueueJob>(
            r#"
            SELECT * FROM queue_jobs
            WHERE status = 'processing' AND claimed_at <= $1
            ORDER BY campaign_id, position ASC
            "#,
        )
        .bind(claimed_before)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn status_counts(&self) -> Result<QueueStatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM queue_jobs GROUP BY status")
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(collect_counts(rows))
    }
}
