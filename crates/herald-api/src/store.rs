//! Storage seam for the submission gateway.
//!
//! Handlers persist and query through [`SubmissionStore`] rather than
//! the concrete repository, so surface tests can drive the full
//! validate-persist-publish path without Postgres.

use std::{future::Future, pin::Pin, sync::Arc};

use herald_core::{
    models::{Channel, Notification, NotificationId, UserId},
    Result, Storage,
};

/// Notification record operations needed by the HTTP surface.
pub trait SubmissionStore: Send + Sync + 'static {
    /// Persists a new notification in `pending` state.
    fn create(
        &self,
        user_id: UserId,
        channel: Channel,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + '_>>;

    /// Loads the record, `None` if it does not exist.
    fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Notification>>> + Send + '_>>;

    /// Lists a user's records, newest first.
    fn list_by_user(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Notification>>> + Send + '_>>;

    /// Verifies the backing store is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store backed by the Postgres repository.
pub struct PostgresSubmissionStore {
    storage: Arc<Storage>,
}

impl PostgresSubmissionStore {
    /// Wraps the shared storage container.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl SubmissionStore for PostgresSubmissionStore {
    fn create(
        &self,
        user_id: UserId,
        channel: Channel,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + '_>> {
        Box::pin(
            async move { self.storage.notifications.create(user_id, channel, &content).await },
        )
    }

    fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Notification>>> + Send + '_>> {
        Box::pin(async move { self.storage.notifications.find_by_id(id).await })
    }

    fn list_by_user(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Notification>>> + Send + '_>> {
        Box::pin(async move { self.storage.notifications.list_by_user(user_id).await })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory submission store for surface tests.

    use std::{
        collections::HashMap,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicI64, Ordering},
            Arc, Mutex,
        },
    };

    use chrono::Utc;
    use herald_core::{
        models::{Channel, Notification, NotificationId, NotificationStatus, UserId},
        Result,
    };

    use super::SubmissionStore;

    /// In-memory store assigning sequential ids.
    pub struct MockSubmissionStore {
        records: Arc<Mutex<HashMap<NotificationId, Notification>>>,
        next_id: AtomicI64,
    }

    impl MockSubmissionStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self { records: Arc::new(Mutex::new(HashMap::new())), next_id: AtomicI64::new(1) }
        }

        /// Current state of a record, if present.
        pub fn get(&self, id: NotificationId) -> Option<Notification> {
            self.records.lock().unwrap().get(&id).cloned()
        }

        /// Number of stored records.
        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        /// Whether the store holds no records.
        pub fn is_empty(&self) -> bool {
            self.records.lock().unwrap().is_empty()
        }
    }

    impl Default for MockSubmissionStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SubmissionStore for MockSubmissionStore {
        fn create(
            &self,
            user_id: UserId,
            channel: Channel,
            content: String,
        ) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + '_>> {
            let id = NotificationId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let notification = Notification {
                id,
                user_id,
                channel,
                content,
                status: NotificationStatus::Pending,
                retry_count: 0,
                created_at: Utc::now(),
                next_attempt_at: None,
                sent_at: None,
                failed_at: None,
            };
            self.records.lock().unwrap().insert(id, notification.clone());

            Box::pin(async move { Ok(notification) })
        }

        fn find_by_id(
            &self,
            id: NotificationId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Notification>>> + Send + '_>> {
            let result = Ok(self.get(id));
            Box::pin(async move { result })
        }

        fn list_by_user(
            &self,
            user_id: UserId,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Notification>>> + Send + '_>> {
            let mut records: Vec<Notification> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|n| n.user_id == user_id)
                .cloned()
                .collect();
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            Box::pin(async move { Ok(records) })
        }

        fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move { Ok(()) })
        }
    }
}
