//! Storage seam for the delivery pipeline.
//!
//! Workers read and update notification records through
//! [`NotificationStore`] rather than the concrete repository, so tests
//! drive the full consume-deliver-finalize path against the in-memory
//! implementation in [`mock`].

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use herald_core::{
    models::{Notification, NotificationId},
    storage::notifications::UpdateOutcome,
    Storage,
};

/// Result alias using the core storage error.
pub type StoreResult<T> = herald_core::Result<T>;

/// Notification record operations needed by the consumer worker.
///
/// Every mutation is a compare-and-set against the caller's last
/// observed retry count; [`UpdateOutcome::Superseded`] means another
/// consumer advanced the record first and this worker's decision must
/// be discarded.
pub trait NotificationStore: Send + Sync + 'static {
    /// Loads the current record, `None` if it does not exist.
    fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<Notification>>> + Send + '_>>;

    /// Marks the record sent if still pending at the expected count.
    fn mark_sent(
        &self,
        id: NotificationId,
        retry_count: i32,
        expected_retry_count: i32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>>;

    /// Records a failed attempt and the advisory next attempt time.
    fn schedule_retry(
        &self,
        id: NotificationId,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        expected_retry_count: i32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>>;

    /// Marks the record failed if still pending at the expected count.
    fn mark_failed(
        &self,
        id: NotificationId,
        retry_count: i32,
        expected_retry_count: i32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>>;
}

/// Production store backed by the Postgres repository.
pub struct PostgresNotificationStore {
    storage: Arc<Storage>,
}

impl PostgresNotificationStore {
    /// Wraps the shared storage container.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl NotificationStore for PostgresNotificationStore {
    fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<Notification>>> + Send + '_>> {
        Box::pin(async move { self.storage.notifications.find_by_id(id).await })
    }

    fn mark_sent(
        &self,
        id: NotificationId,
        retry_count: i32,
        expected_retry_count: i32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>> {
        Box::pin(async move {
            self.storage.notifications.mark_sent(id, retry_count, expected_retry_count).await
        })
    }

    fn schedule_retry(
        &self,
        id: NotificationId,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        expected_retry_count: i32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>> {
        Box::pin(async move {
            self.storage
                .notifications
                .schedule_retry(id, retry_count, next_attempt_at, expected_retry_count)
                .await
        })
    }

    fn mark_failed(
        &self,
        id: NotificationId,
        retry_count: i32,
        expected_retry_count: i32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>> {
        Box::pin(async move {
            self.storage.notifications.mark_failed(id, retry_count, expected_retry_count).await
        })
    }
}

pub mod mock {
    //! In-memory notification store for deterministic tests.
    //!
    //! Honors the same compare-and-set semantics as the Postgres
    //! repository, including `Superseded` results for stale updates.

    use std::{
        collections::HashMap,
        future::Future,
        pin::Pin,
        sync::{Arc, Mutex},
    };

    use chrono::{DateTime, Utc};
    use herald_core::{
        models::{Channel, Notification, NotificationId, NotificationStatus, UserId},
        storage::notifications::UpdateOutcome,
        CoreError,
    };

    use super::{NotificationStore, StoreResult};

    /// In-memory store with injectable failures.
    pub struct MockNotificationStore {
        records: Arc<Mutex<HashMap<NotificationId, Notification>>>,
        next_error: Arc<Mutex<Option<String>>>,
        stale_read: Arc<Mutex<Option<Notification>>>,
    }

    impl MockNotificationStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self {
                records: Arc::new(Mutex::new(HashMap::new())),
                next_error: Arc::new(Mutex::new(None)),
                stale_read: Arc::new(Mutex::new(None)),
            }
        }

        /// Seeds a pending notification with a zero retry count.
        pub fn insert_pending(
            &self,
            id: NotificationId,
            user_id: UserId,
            channel: Channel,
            content: &str,
        ) -> Notification {
            let notification = Notification {
                id,
                user_id,
                channel,
                content: content.to_string(),
                status: NotificationStatus::Pending,
                retry_count: 0,
                created_at: Utc::now(),
                next_attempt_at: None,
                sent_at: None,
                failed_at: None,
            };
            self.records.lock().unwrap().insert(id, notification.clone());
            notification
        }

        /// Seeds an arbitrary record, replacing any existing one.
        pub fn insert(&self, notification: Notification) {
            self.records.lock().unwrap().insert(notification.id, notification);
        }

        /// Current state of a record, if present.
        pub fn get(&self, id: NotificationId) -> Option<Notification> {
            self.records.lock().unwrap().get(&id).cloned()
        }

        /// Makes the next store call fail with a database error.
        pub fn inject_error(&self, message: impl Into<String>) {
            *self.next_error.lock().unwrap() = Some(message.into());
        }

        /// Makes the next find return this snapshot instead of the
        /// stored record, simulating a concurrent consumer racing
        /// ahead between a read and the following compare-and-set.
        pub fn inject_stale_read(&self, snapshot: Notification) {
            *self.stale_read.lock().unwrap() = Some(snapshot);
        }

        fn take_error(&self) -> Option<CoreError> {
            self.next_error.lock().unwrap().take().map(CoreError::Database)
        }

        fn cas_update(
            &self,
            id: NotificationId,
            expected_retry_count: i32,
            apply: impl FnOnce(&mut Notification),
        ) -> UpdateOutcome {
            let mut records = self.records.lock().unwrap();
            match records.get_mut(&id) {
                Some(record)
                    if record.status == NotificationStatus::Pending
                        && record.retry_count == expected_retry_count =>
                {
                    apply(record);
                    UpdateOutcome::Applied
                },
                _ => UpdateOutcome::Superseded,
            }
        }
    }

    impl Default for MockNotificationStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl NotificationStore for MockNotificationStore {
        fn find_by_id(
            &self,
            id: NotificationId,
        ) -> Pin<Box<dyn Future<Output = StoreResult<Option<Notification>>> + Send + '_>>
        {
            let result = match self.take_error() {
                Some(e) => Err(e),
                None => match self.stale_read.lock().unwrap().take() {
                    Some(snapshot) => Ok(Some(snapshot)),
                    None => Ok(self.get(id)),
                },
            };
            Box::pin(async move { result })
        }

        fn mark_sent(
            &self,
            id: NotificationId,
            retry_count: i32,
            expected_retry_count: i32,
        ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>> {
            let result = match self.take_error() {
                Some(e) => Err(e),
                None => Ok(self.cas_update(id, expected_retry_count, |record| {
                    record.status = NotificationStatus::Sent;
                    record.retry_count = retry_count;
                    record.next_attempt_at = None;
                    record.sent_at = Some(Utc::now());
                })),
            };
            Box::pin(async move { result })
        }

        fn schedule_retry(
            &self,
            id: NotificationId,
            retry_count: i32,
            next_attempt_at: DateTime<Utc>,
            expected_retry_count: i32,
        ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>> {
            let result = match self.take_error() {
                Some(e) => Err(e),
                None => Ok(self.cas_update(id, expected_retry_count, |record| {
                    record.retry_count = retry_count;
                    record.next_attempt_at = Some(next_attempt_at);
                })),
            };
            Box::pin(async move { result })
        }

        fn mark_failed(
            &self,
            id: NotificationId,
            retry_count: i32,
            expected_retry_count: i32,
        ) -> Pin<Box<dyn Future<Output = StoreResult<UpdateOutcome>> + Send + '_>> {
            let result = match self.take_error() {
                Some(e) => Err(e),
                None => Ok(self.cas_update(id, expected_retry_count, |record| {
                    record.status = NotificationStatus::Failed;
                    record.retry_count = retry_count;
                    record.next_attempt_at = None;
                    record.failed_at = Some(Utc::now());
                })),
            };
            Box::pin(async move { result })
        }
    }
}
