//! Gateway sender tests against a mock HTTP server.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use herald_core::models::{Channel, Notification, NotificationId, NotificationStatus, UserId};
use herald_delivery::{ChannelSender, Dispatcher, GatewaySender, SendOutcome};
use wiremock::{
    matchers::{body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn notification(channel: Channel) -> Notification {
    Notification {
        id: NotificationId(1),
        user_id: UserId(42),
        channel,
        content: "order shipped".to_string(),
        status: NotificationStatus::Pending,
        retry_count: 0,
        created_at: Utc::now(),
        next_attempt_at: None,
        sent_at: None,
        failed_at: None,
    }
}

fn sender_for(server: &MockServer) -> GatewaySender {
    GatewaySender::new(
        Channel::Email,
        reqwest::Client::new(),
        Some(format!("{}/send", server.uri())),
    )
}

#[tokio::test]
async fn posts_user_id_and_content_to_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_json(serde_json::json!({
            "user_id": 42,
            "content": "order shipped",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&notification(Channel::Email)).await;
    assert_eq!(outcome, SendOutcome::Delivered);
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&notification(Channel::Email)).await;
    assert!(matches!(outcome, SendOutcome::TransientFailure(_)), "got {outcome:?}");
}

#[tokio::test]
async fn rate_limiting_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&notification(Channel::Email)).await;
    assert!(matches!(outcome, SendOutcome::TransientFailure(_)), "got {outcome:?}");
}

#[tokio::test]
async fn client_rejection_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&notification(Channel::Email)).await;
    assert!(matches!(outcome, SendOutcome::PermanentFailure(_)), "got {outcome:?}");
}

#[tokio::test]
async fn connection_failure_is_transient() {
    // Nothing listens on this port.
    let sender = GatewaySender::new(
        Channel::Email,
        reqwest::Client::new(),
        Some("http://127.0.0.1:1/send".to_string()),
    );

    let outcome = sender.send(&notification(Channel::Email)).await;
    assert!(matches!(outcome, SendOutcome::TransientFailure(_)), "got {outcome:?}");
}

#[tokio::test]
async fn missing_gateway_url_simulates_delivery() {
    let sender = GatewaySender::new(Channel::Sms, reqwest::Client::new(), None);

    let outcome = sender.send(&notification(Channel::Sms)).await;
    assert_eq!(outcome, SendOutcome::Delivered);
}

#[tokio::test]
async fn dispatcher_times_out_slow_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(Duration::from_millis(50))
        .with_sender(Arc::new(sender_for(&server)));

    let outcome = dispatcher.dispatch(&notification(Channel::Email)).await;
    assert!(matches!(outcome, SendOutcome::TransientFailure(_)), "got {outcome:?}");
}

#[tokio::test]
async fn dispatcher_rejects_unregistered_channel() {
    let dispatcher = Dispatcher::new(Duration::from_secs(1));

    let outcome = dispatcher.dispatch(&notification(Channel::InApp)).await;
    assert!(matches!(outcome, SendOutcome::PermanentFailure(_)), "got {outcome:?}");
}
