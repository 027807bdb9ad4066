//! Core domain models, persistence, and shared abstractions.
//!
//! Provides strongly-typed domain primitives, the Postgres-backed
//! notification store, error handling, and the clock abstraction used
//! by the delivery pipeline. All other crates depend on these
//! foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Channel, Notification, NotificationId, NotificationStatus, UserId};
pub use storage::{notifications::UpdateOutcome, Storage};
pub use time::{Clock, RealClock, TestClock};
