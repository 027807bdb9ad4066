//! Notification submission and query endpoints.
//!
//! Submission follows persist-then-publish: the record is created in
//! `pending` state first, then a queue message is published. If the
//! publish fails the handler reports 502 and the record stays pending
//! with nothing enqueued, which is the honest answer; nothing will
//! attempt delivery until it is resubmitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use herald_core::models::{Channel, Notification, NotificationId, UserId};
use herald_queue::QueueMessage;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::ApiError;
use crate::AppState;

/// Request body for notification submission.
#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    /// Recipient reference.
    pub user_id: i64,
    /// Delivery channel.
    pub channel: Channel,
    /// Opaque payload to deliver.
    pub content: String,
}

/// JSON representation of a notification record.
#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    /// Record identifier.
    pub id: i64,
    /// Recipient reference.
    pub user_id: i64,
    /// Delivery channel.
    pub channel: Channel,
    /// Opaque payload.
    pub content: String,
    /// Current delivery status.
    pub status: String,
    /// Attempts counted so far.
    pub retry_count: i32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Advisory time of the next scheduled attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When delivery succeeded.
    pub sent_at: Option<DateTime<Utc>>,
    /// When delivery was abandoned.
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id.0,
            user_id: n.user_id.0,
            channel: n.channel,
            content: n.content,
            status: n.status.to_string(),
            retry_count: n.retry_count,
            created_at: n.created_at,
            next_attempt_at: n.next_attempt_at,
            sent_at: n.sent_at,
            failed_at: n.failed_at,
        }
    }
}

/// Creates a notification and enqueues it for delivery.
///
/// Returns 201 with the persisted record, 422 for invalid input, or
/// 502 when the record was stored but the queue publish failed.
#[instrument(skip(state, request), fields(user_id = request.user_id, channel = %request.channel))]
pub async fn create_notification(
    State(state): State<AppState>,
    Json(request): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<NotificationResponse>), ApiError> {
    if request.user_id <= 0 {
        return Err(ApiError::InvalidInput("user_id must be positive".to_string()));
    }
    if request.content.is_empty() {
        return Err(ApiError::InvalidInput("content must not be empty".to_string()));
    }

    let notification = state
        .store
        .create(UserId(request.user_id), request.channel, request.content)
        .await?;

    if let Err(e) = state.broker.publish(QueueMessage::from_notification(&notification)).await {
        error!(
            notification_id = %notification.id,
            error = %e,
            "notification stored but queue publish failed"
        );
        return Err(ApiError::PublishFailed(format!(
            "notification {} was stored but could not be enqueued",
            notification.id
        )));
    }

    info!(notification_id = %notification.id, "notification accepted");
    Ok((StatusCode::CREATED, Json(notification.into())))
}

/// Fetches a single notification by id.
#[instrument(skip(state))]
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NotificationResponse>, ApiError> {
    let notification = state
        .store
        .find_by_id(NotificationId(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("notification {id} not found")))?;

    Ok(Json(notification.into()))
}

/// Lists a user's notifications, newest first.
///
/// A user with no notifications gets 200 and an empty array, not 404.
#[instrument(skip(state))]
pub async fn list_user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<NotificationResponse>>, ApiError> {
    let notifications = state.store.list_by_user(UserId(user_id)).await?;

    Ok(Json(notifications.into_iter().map(NotificationResponse::from).collect()))
}
