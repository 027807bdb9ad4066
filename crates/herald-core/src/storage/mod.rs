//! Database access layer implementing the repository pattern for
//! notification persistence.
//!
//! The repository layer translates between domain models and the
//! database schema. All database operations go through it; direct SQL
//! outside this module is forbidden to keep the compare-and-set
//! discipline in one place.

use std::sync::Arc;

use sqlx::PgPool;

pub mod notifications;

use crate::error::Result;

/// Container for repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for notification records.
    pub notifications: Arc<notifications::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { notifications: Arc::new(notifications::Repository::new(pool)) }
    }

    /// Performs a health check on the database connection.
    ///
    /// Executes a trivial query to verify connectivity; used by the
    /// readiness probe.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) =
            sqlx::query_as("SELECT 1").fetch_one(&*self.notifications.pool()).await?;

        Ok(())
    }
}
