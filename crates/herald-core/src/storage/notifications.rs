//! Repository for notification database operations.
//!
//! Creation and reads are plain queries; every mutation is a
//! compare-and-set conditioned on `status = 'pending'` and the
//! caller's expected `retry_count`, so concurrent consumers working on
//! a duplicated queue message cannot double-apply a decision or touch
//! a terminal record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Channel, Notification, NotificationId, UserId},
};

/// Result of a compare-and-set mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row matched the expected state and was updated.
    Applied,
    /// Another consumer already advanced the record; nothing changed.
    Superseded,
}

impl UpdateOutcome {
    fn from_rows_affected(rows: u64) -> Self {
        if rows > 0 {
            Self::Applied
        } else {
            Self::Superseded
        }
    }
}

const SELECT_COLUMNS: &str = "id, user_id, channel, content, status, retry_count, \
                              created_at, next_attempt_at, sent_at, failed_at";

/// Repository for notification database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates a new notification in `pending` state with a zero retry
    /// count.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(
        &self,
        user_id: UserId,
        channel: Channel,
        content: &str,
    ) -> Result<Notification> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications (user_id, channel, content, status, retry_count)
            VALUES ($1, $2, $3, 'pending', 0)
            RETURNING {SELECT_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(channel.as_str())
        .bind(content)
        .fetch_one(&*self.pool)
        .await?;

        Ok(notification)
    }

    /// Finds a notification by ID.
    ///
    /// A missing id is `None`, not an error; the consumer worker treats
    /// it as a terminal no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: NotificationId) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(notification)
    }

    /// Finds all notifications for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        ))
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(notifications)
    }

    /// Marks a notification as successfully delivered.
    ///
    /// Terminal: clears any retry schedule and records the delivery
    /// timestamp. Applied only if the record is still pending with the
    /// expected retry count.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent(
        &self,
        id: NotificationId,
        retry_count: i32,
        expected_retry_count: i32,
    ) -> Result<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sent', retry_count = $2, next_attempt_at = NULL, sent_at = NOW()
            WHERE id = $1 AND status = 'pending' AND retry_count = $3
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(expected_retry_count)
        .execute(&*self.pool)
        .await?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }

    /// Records a failed attempt and schedules the next retry.
    ///
    /// The record stays `pending`; `next_attempt_at` is advisory (the
    /// scheduler owns the actual republish timing).
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn schedule_retry(
        &self,
        id: NotificationId,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        expected_retry_count: i32,
    ) -> Result<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET retry_count = $2, next_attempt_at = $3
            WHERE id = $1 AND status = 'pending' AND retry_count = $4
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_attempt_at)
        .bind(expected_retry_count)
        .execute(&*self.pool)
        .await?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }

    /// Marks a notification as permanently failed.
    ///
    /// Terminal: retries exhausted or a non-retryable dispatch failure.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        id: NotificationId,
        retry_count: i32,
        expected_retry_count: i32,
    ) -> Result<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed', retry_count = $2, next_attempt_at = NULL, failed_at = NOW()
            WHERE id = $1 AND status = 'pending' AND retry_count = $3
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(expected_retry_count)
        .execute(&*self.pool)
        .await?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }
}
