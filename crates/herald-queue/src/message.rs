//! Queue message schema.

use herald_core::models::{Channel, Notification, NotificationId, UserId};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a notification as it travels the queue.
///
/// The wire format is a JSON object
/// `{"id": int, "user_id": int, "channel": "email"|"sms"|"in_app",
/// "content": string}`. The persisted record, not this snapshot, is the
/// source of truth for delivery state; consumers re-read the record by
/// `id` on every delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Identifier of the persisted notification record.
    pub id: NotificationId,
    /// Recipient reference.
    pub user_id: UserId,
    /// Delivery channel.
    pub channel: Channel,
    /// Opaque payload.
    pub content: String,
}

impl QueueMessage {
    /// Builds the queue snapshot for a persisted notification.
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            user_id: notification.user_id,
            channel: notification.channel,
            content: notification.content.clone(),
        }
    }
}
