//! End-to-end pipeline tests
//!
//! Drives the public API the way the binary does: deliveries come from a
//! scripted subscription, functions and callbacks are HTTP mocks.

use function_relay::callback::CallbackNotifier;
use function_relay::config::{DeliveryMode, RelaySection};
use function_relay::dispatch::{DispatchError, FunctionDispatcher};
use function_relay::protocol::{Delivery, Task, TaskResult};
use function_relay::retry::RetryPolicy;
use function_relay::routing::route;
use function_relay::testing::{
    MockFunction, MockSubscription, MockSubscriptionError, SettlementRecord,
};
use function_relay::transport::Subscription;
use function_relay::worker::QueueWorker;
use function_relay::RelayError;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

type EventLog = Arc<Mutex<Vec<&'static str>>>;

/// Subscription that appends its settlements to a shared event log
struct RecordingSubscription {
    inner: MockSubscription,
    events: EventLog,
}

#[async_trait::async_trait]
impl Subscription for RecordingSubscription {
    type Error = MockSubscriptionError;

    async fn next_delivery(&mut self) -> Option<Result<Delivery, Self::Error>> {
        self.inner.next_delivery().await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        self.events.lock().unwrap().push("ack");
        self.inner.ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), Self::Error> {
        self.events.lock().unwrap().push("nack");
        self.inner.nack(delivery, requeue).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

/// Callback endpoint that appends to the same event log
struct RecordingCallback {
    events: EventLog,
}

impl Respond for RecordingCallback {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.events.lock().unwrap().push("callback");
        ResponseTemplate::new(200)
    }
}

#[tokio::test]
async fn test_function_reply_is_forwarded_unchanged() {
    let function = MockServer::start().await;
    let callback = MockServer::start().await;
    let owner = format!("{}/cb", callback.uri());

    let reply = json!({
        "owner": owner,
        "body": "42",
        "critical": true,
        "correlationId": "cid-1"
    });

    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "owner": owner,
            "body": format!("{}/", function.uri()),
            "critical": true,
            "correlationId": "cid-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply.clone()))
        .expect(1)
        .mount(&function)
        .await;

    Mock::given(method("POST"))
        .and(path("/cb"))
        .and(body_json(reply))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&callback)
        .await;

    let delivery = Delivery::new(1, "orders.critical.v2")
        .with_reply_to(owner.clone())
        .with_correlation_id("cid-1");
    let mut task = Task::from_delivery(&delivery, &route(&delivery.routing_key).unwrap());
    assert_eq!(task.destination, "http://orders.default.svc.cluster.local/");
    // Point the routed task at the local mock instead of the cluster
    task.destination = format!("{}/", function.uri());

    let dispatcher = FunctionDispatcher::new(Some(Duration::from_secs(5)), RetryPolicy::none());
    let result = dispatcher.dispatch(&task).await.unwrap();

    let notifier = CallbackNotifier::new(Some(Duration::from_secs(5)), RetryPolicy::none());
    let outcome = notifier
        .notify(&result, delivery.reply_to_or_empty(), result.critical)
        .await;

    assert!(outcome.is_delivered());
}

#[tokio::test]
async fn test_worker_relays_in_default_guarded_mode() {
    let callback = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&callback)
        .await;

    let function = MockFunction::new();
    function
        .reply_with(TaskResult {
            body: "first".to_string(),
            ..Default::default()
        })
        .await;
    function
        .reply_with(TaskResult {
            body: "second".to_string(),
            critical: true,
            ..Default::default()
        })
        .await;

    let reply_to = format!("{}/cb", callback.uri());
    let subscription = MockSubscription::with_deliveries(vec![
        Delivery::new(1, "resize.normal.function").with_reply_to(reply_to.clone()),
        Delivery::new(2, "resize.critical.function").with_reply_to(reply_to),
    ]);

    let relay = RelaySection::default();
    let notifier = CallbackNotifier::new(relay.request_timeout(), RetryPolicy::new(1, 1));
    let (_tx, rx) = watch::channel(false);
    let mut worker = QueueWorker::new(
        subscription.clone(),
        function.clone(),
        notifier,
        relay.delivery_mode,
        rx,
    );

    worker.run().await.unwrap();

    assert_eq!(subscription.acked_tags().await, vec![1, 2]);
    let received = function.received().await;
    assert!(!received[0].critical);
    assert!(received[1].critical);
}

#[tokio::test]
async fn test_callback_is_posted_before_ack() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let callback = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(RecordingCallback {
            events: events.clone(),
        })
        .expect(2)
        .mount(&callback)
        .await;

    let function = MockFunction::new();
    function.reply_with(TaskResult::default()).await;
    function
        .reply_with(TaskResult {
            critical: true,
            ..Default::default()
        })
        .await;

    let reply_to = format!("{}/cb", callback.uri());
    let inner = MockSubscription::with_deliveries(vec![
        Delivery::new(1, "resize.normal").with_reply_to(reply_to.clone()),
        Delivery::new(2, "resize.critical").with_reply_to(reply_to),
    ]);
    let subscription = RecordingSubscription {
        inner: inner.clone(),
        events: events.clone(),
    };

    let (_tx, rx) = watch::channel(false);
    let mut worker = QueueWorker::new(
        subscription,
        function,
        CallbackNotifier::new(None, RetryPolicy::none()),
        DeliveryMode::Guarded,
        rx,
    );
    worker.run().await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["callback", "ack", "callback", "ack"]
    );
    assert_eq!(inner.acked_tags().await, vec![1, 2]);
}

#[tokio::test]
async fn test_fail_fast_leaves_remaining_deliveries_untouched() {
    let function = MockFunction::new();
    function.reply_with(TaskResult::default()).await;
    function
        .fail_with(DispatchError::Status {
            destination: "http://thumbs.default.svc.cluster.local/".to_string(),
            status: 502,
        })
        .await;

    let subscription = MockSubscription::with_deliveries(vec![
        Delivery::new(1, "thumbs.normal"),
        Delivery::new(2, "thumbs.normal"),
        Delivery::new(3, "thumbs.normal"),
    ]);
    let (_tx, rx) = watch::channel(false);
    let mut worker = QueueWorker::new(
        subscription.clone(),
        function,
        CallbackNotifier::new(None, RetryPolicy::none()),
        DeliveryMode::FailFast,
        rx,
    );

    match worker.run().await {
        Err(RelayError::DispatchFatal { destination, .. }) => {
            assert_eq!(destination, "http://thumbs.default.svc.cluster.local/");
        }
        other => panic!("expected fatal dispatch error, got {other:?}"),
    }

    assert_eq!(
        subscription.settlements().await,
        vec![SettlementRecord::Ack { tag: 1 }]
    );
    assert_eq!(subscription.pending().await, 1);
}

#[tokio::test]
async fn test_worker_from_config_builds_http_pipeline() {
    let relay = RelaySection {
        delivery_mode: DeliveryMode::FailFast,
        request_timeout_secs: 1,
        ..Default::default()
    };
    let (_tx, rx) = watch::channel(false);
    let worker = QueueWorker::from_config(MockSubscription::new(), &relay, rx);

    assert_eq!(worker.mode(), DeliveryMode::FailFast);
    assert!(worker.subscription().settlements().await.is_empty());
}
