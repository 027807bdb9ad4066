//! Core domain models and strongly-typed identifiers.
//!
//! Defines the notification entity, its delivery lifecycle states, and
//! newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits for the Postgres-backed store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed notification identifier.
///
/// Wraps the database-assigned integer key to prevent mixing with other
/// ID types. Assigned once at creation and immutable afterwards; the same
/// value travels in queue messages through the whole delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub i64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for NotificationId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for NotificationId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for NotificationId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed recipient identifier.
///
/// An opaque reference to the user a notification is addressed to. The
/// delivery pipeline never resolves it; channel gateways do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for UserId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for UserId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for UserId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Delivery channel for a notification.
///
/// A closed set; adding a channel means adding a sender implementation,
/// so the enum is deliberately non-extensible at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Deliver via the email gateway.
    Email,
    /// Deliver via the SMS gateway.
    Sms,
    /// Deliver into the application's own notification feed.
    InApp,
}

impl Channel {
    /// Wire name used in queue messages and database rows.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::InApp => "in_app",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "in_app" => Ok(Self::InApp),
            other => Err(format!("invalid channel: {other}")),
        }
    }
}

impl sqlx::Type<PgDb> for Channel {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for Channel {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// Notification lifecycle status.
///
/// ```text
/// Pending -> Pending (retry scheduled)
///         -> Sent    (terminal)
///         -> Failed  (terminal)
/// ```
///
/// Terminal states are enforced by the store: every mutation carries a
/// `status = 'pending'` predicate, so no update can leave Sent or
/// Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Waiting for delivery, or scheduled for a retry.
    Pending,

    /// Successfully delivered. Terminal.
    Sent,

    /// Retries exhausted or a permanent dispatch failure. Terminal.
    Failed,
}

impl NotificationStatus {
    /// Returns true for states that permit no further transition.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for NotificationStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for NotificationStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid notification status: {other}").into()),
        }
    }
}

/// A notification and its delivery state.
///
/// The only persisted entity. Identity fields (`id`, `user_id`,
/// `channel`, `content`, `created_at`) are immutable after creation;
/// `status`, `retry_count` and the timestamp columns are mutated
/// exclusively by the consumer worker, one compare-and-set at a time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    /// Unique identifier, assigned by the database at creation.
    pub id: NotificationId,

    /// Recipient reference.
    pub user_id: UserId,

    /// Delivery channel.
    pub channel: Channel,

    /// Opaque payload handed verbatim to the channel gateway.
    pub content: String,

    /// Current lifecycle status.
    pub status: NotificationStatus,

    /// Number of dispatch attempts made so far.
    ///
    /// Monotonically non-decreasing; capped by the retry policy's
    /// `max_retries`.
    pub retry_count: i32,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the next retry is due, if one is scheduled.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// When successfully delivered (terminal).
    pub sent_at: Option<DateTime<Utc>>,

    /// When permanently failed (terminal).
    pub failed_at: Option<DateTime<Utc>>,
}
