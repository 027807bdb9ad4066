//! Channel senders and attempt dispatch.
//!
//! A [`ChannelSender`] performs one delivery attempt for one channel and
//! reports a [`SendOutcome`]. Attempt failures are data, not errors:
//! the retry policy resolves them, so senders never return `Result`.
//! The [`Dispatcher`] routes a notification to the sender for its
//! channel and bounds the attempt with a timeout.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use herald_core::models::{Channel, Notification};
use serde::Serialize;
use tracing::{debug, info};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the notification.
    Delivered,
    /// The attempt failed in a way that may succeed later.
    TransientFailure(String),
    /// The attempt failed in a way retrying cannot fix.
    PermanentFailure(String),
}

impl SendOutcome {
    /// Whether the attempt succeeded.
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// A delivery mechanism for one notification channel.
pub trait ChannelSender: Send + Sync + 'static {
    /// The channel this sender handles.
    fn channel(&self) -> Channel;

    /// Performs one delivery attempt.
    fn send(
        &self,
        notification: &Notification,
    ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + '_>>;
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    user_id: i64,
    content: &'a str,
}

/// Classifies a gateway response status into a send outcome.
///
/// Server errors, timeouts, and rate limiting are worth retrying. Any
/// other client error means the request itself is bad and a retry
/// would fail identically.
fn classify_status(status: reqwest::StatusCode) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Delivered;
    }

    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        return SendOutcome::TransientFailure(format!("gateway returned {status}"));
    }

    SendOutcome::PermanentFailure(format!("gateway rejected request: {status}"))
}

/// Posts the notification to an HTTP gateway and classifies the result.
async fn post_to_gateway(
    client: &reqwest::Client,
    url: &str,
    notification: &Notification,
) -> SendOutcome {
    let request = GatewayRequest {
        user_id: notification.user_id.0,
        content: &notification.content,
    };

    match client.post(url).json(&request).send().await {
        Ok(response) => classify_status(response.status()),
        // Connection-level failures are always worth retrying.
        Err(e) => SendOutcome::TransientFailure(format!("gateway request failed: {e}")),
    }
}

/// HTTP-backed sender for one channel.
///
/// With a gateway URL configured, attempts are HTTP posts and the
/// response status decides the outcome. Without one, delivery is
/// simulated and always succeeds, which keeps local environments
/// usable without provider credentials.
pub struct GatewaySender {
    channel: Channel,
    client: reqwest::Client,
    gateway_url: Option<String>,
}

impl GatewaySender {
    /// Creates a sender, simulated when `gateway_url` is `None`.
    pub fn new(channel: Channel, client: reqwest::Client, gateway_url: Option<String>) -> Self {
        Self { channel, client, gateway_url }
    }
}

impl ChannelSender for GatewaySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn send(
        &self,
        notification: &Notification,
    ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + '_>> {
        let notification = notification.clone();

        Box::pin(async move {
            match &self.gateway_url {
                Some(url) => post_to_gateway(&self.client, url, &notification).await,
                None => {
                    info!(
                        notification_id = %notification.id,
                        user_id = %notification.user_id,
                        channel = %self.channel,
                        "simulated delivery"
                    );
                    SendOutcome::Delivered
                },
            }
        })
    }
}

/// Routes notifications to the sender registered for their channel.
pub struct Dispatcher {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    attempt_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher with the given per-attempt timeout.
    pub fn new(attempt_timeout: Duration) -> Self {
        Self { senders: HashMap::new(), attempt_timeout }
    }

    /// Registers a sender, replacing any existing one for its channel.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    /// Performs one bounded delivery attempt.
    ///
    /// A missing sender is permanent: no amount of retrying registers
    /// one. A timed-out attempt is transient.
    pub async fn dispatch(&self, notification: &Notification) -> SendOutcome {
        let Some(sender) = self.senders.get(&notification.channel) else {
            return SendOutcome::PermanentFailure(format!(
                "no sender registered for channel {}",
                notification.channel
            ));
        };

        debug!(
            notification_id = %notification.id,
            channel = %notification.channel,
            "dispatching delivery attempt"
        );

        match tokio::time::timeout(self.attempt_timeout, sender.send(notification)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::TransientFailure(format!(
                "attempt exceeded {}s timeout",
                self.attempt_timeout.as_secs()
            )),
        }
    }
}

pub mod mock {
    //! Scripted sender for deterministic worker tests.

    use std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::{Arc, Mutex},
    };

    use herald_core::models::{Channel, Notification, NotificationId};

    use super::{ChannelSender, SendOutcome};

    /// Sender that replays scripted outcomes and records every call.
    pub struct MockSender {
        channel: Channel,
        outcomes: Arc<Mutex<VecDeque<SendOutcome>>>,
        calls: Arc<Mutex<Vec<NotificationId>>>,
    }

    impl MockSender {
        /// Creates a mock sender for the given channel.
        pub fn new(channel: Channel) -> Self {
            Self {
                channel,
                outcomes: Arc::new(Mutex::new(VecDeque::new())),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Queues the outcome for the next send call.
        ///
        /// When the script runs out, sends succeed.
        pub fn push_outcome(&self, outcome: SendOutcome) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        /// Notification ids of every send call, in order.
        pub fn calls(&self) -> Vec<NotificationId> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of send calls made.
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ChannelSender for MockSender {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn send(
            &self,
            notification: &Notification,
        ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + '_>> {
            self.calls.lock().unwrap().push(notification.id);
            let outcome =
                self.outcomes.lock().unwrap().pop_front().unwrap_or(SendOutcome::Delivered);

            Box::pin(async move { outcome })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_are_delivered() {
        assert_eq!(classify_status(reqwest::StatusCode::OK), SendOutcome::Delivered);
        assert_eq!(classify_status(reqwest::StatusCode::ACCEPTED), SendOutcome::Delivered);
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            reqwest::StatusCode::BAD_GATEWAY,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            reqwest::StatusCode::REQUEST_TIMEOUT,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(
                matches!(classify_status(status), SendOutcome::TransientFailure(_)),
                "{status} should be transient"
            );
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [
            reqwest::StatusCode::BAD_REQUEST,
            reqwest::StatusCode::UNAUTHORIZED,
            reqwest::StatusCode::NOT_FOUND,
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert!(
                matches!(classify_status(status), SendOutcome::PermanentFailure(_)),
                "{status} should be permanent"
            );
        }
    }
}
