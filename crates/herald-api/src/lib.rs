//! HTTP API for the Herald notification service.
//!
//! Exposes notification submission and query endpoints plus health
//! probes. Submission persists the record before enqueueing it, so a
//! queue outage can never lose an accepted notification, only delay
//! it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;
pub mod store;

use std::sync::Arc;

use herald_queue::QueueBroker;

pub use config::Config;
pub use server::{create_router, start_server};
pub use store::{PostgresSubmissionStore, SubmissionStore};

/// Shared state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Notification persistence seam.
    pub store: Arc<dyn SubmissionStore>,
    /// Queue broker used to enqueue accepted notifications.
    pub broker: Arc<dyn QueueBroker>,
}

impl AppState {
    /// Creates application state from its collaborators.
    pub fn new(store: Arc<dyn SubmissionStore>, broker: Arc<dyn QueueBroker>) -> Self {
        Self { store, broker }
    }
}
