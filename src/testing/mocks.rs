//! Mock implementations for testing
//!
//! Provides a scripted [`Subscription`] that records every settlement and a
//! scripted [`FunctionInvoker`], so the queue worker can be exercised without
//! a broker or a cluster.

use crate::dispatch::{DispatchError, FunctionInvoker};
use crate::protocol::{Delivery, Task, TaskResult};
use crate::transport::Subscription;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Settlement observed by the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementRecord {
    Ack { tag: u64 },
    Nack { tag: u64, requeue: bool },
}

impl SettlementRecord {
    pub fn tag(&self) -> u64 {
        match self {
            SettlementRecord::Ack { tag } | SettlementRecord::Nack { tag, .. } => *tag,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("mock subscription error: {0}")]
pub struct MockSubscriptionError(pub String);

/// Scripted subscription; ends once its queue is drained
#[derive(Debug, Clone)]
pub struct MockSubscription {
    queue: Arc<Mutex<VecDeque<Result<Delivery, MockSubscriptionError>>>>,
    settlements: Arc<Mutex<Vec<SettlementRecord>>>,
    connected: Arc<AtomicBool>,
    fail_settlement: bool,
}

impl Default for MockSubscription {
    fn default() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            settlements: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(true)),
            fail_settlement: false,
        }
    }
}

impl MockSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deliveries(deliveries: impl IntoIterator<Item = Delivery>) -> Self {
        let queue: VecDeque<_> = deliveries.into_iter().map(Ok).collect();
        Self {
            queue: Arc::new(Mutex::new(queue)),
            ..Self::default()
        }
    }

    /// Every ack and nack fails
    pub fn with_settlement_failure(mut self) -> Self {
        self.fail_settlement = true;
        self
    }

    pub async fn push_delivery(&self, delivery: Delivery) {
        self.queue.lock().await.push_back(Ok(delivery));
    }

    /// Queue a stream error, as a dropped connection would produce
    pub async fn push_error(&self, message: &str) {
        self.queue
            .lock()
            .await
            .push_back(Err(MockSubscriptionError(message.to_string())));
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub async fn settlements(&self) -> Vec<SettlementRecord> {
        self.settlements.lock().await.clone()
    }

    pub async fn acked_tags(&self) -> Vec<u64> {
        self.settlements
            .lock()
            .await
            .iter()
            .filter_map(|record| match record {
                SettlementRecord::Ack { tag } => Some(*tag),
                SettlementRecord::Nack { .. } => None,
            })
            .collect()
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    async fn record(&self, record: SettlementRecord) -> Result<(), MockSubscriptionError> {
        if self.fail_settlement {
            return Err(MockSubscriptionError(format!(
                "settlement of delivery {} failed",
                record.tag()
            )));
        }
        self.settlements.lock().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl Subscription for MockSubscription {
    type Error = MockSubscriptionError;

    async fn next_delivery(&mut self) -> Option<Result<Delivery, Self::Error>> {
        self.queue.lock().await.pop_front()
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        self.record(SettlementRecord::Ack {
            tag: delivery.delivery_tag,
        })
        .await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), Self::Error> {
        self.record(SettlementRecord::Nack {
            tag: delivery.delivery_tag,
            requeue,
        })
        .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Scripted function endpoint recording every task it receives
#[derive(Debug, Clone, Default)]
pub struct MockFunction {
    replies: Arc<Mutex<VecDeque<Result<TaskResult, DispatchError>>>>,
    received: Arc<Mutex<Vec<Task>>>,
}

impl MockFunction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next invocation
    pub async fn reply_with(&self, reply: TaskResult) {
        self.replies.lock().await.push_back(Ok(reply));
    }

    /// Queue a failure for the next invocation
    pub async fn fail_with(&self, error: DispatchError) {
        self.replies.lock().await.push_back(Err(error));
    }

    pub async fn received(&self) -> Vec<Task> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl FunctionInvoker for MockFunction {
    async fn invoke(&self, task: &Task) -> Result<TaskResult, DispatchError> {
        self.received.lock().await.push(task.clone());
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(DispatchError::Transport {
                    destination: task.destination.clone(),
                    message: "no scripted reply".to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_drains_then_ends() {
        let mut subscription = MockSubscription::with_deliveries(vec![
            Delivery::new(1, "a.critical"),
            Delivery::new(2, "b.normal"),
        ]);

        let first = subscription.next_delivery().await.unwrap().unwrap();
        assert_eq!(first.delivery_tag, 1);
        let second = subscription.next_delivery().await.unwrap().unwrap();
        assert_eq!(second.delivery_tag, 2);
        assert!(subscription.next_delivery().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_records_settlements_in_order() {
        let subscription = MockSubscription::new();
        let handle = subscription.clone();

        subscription.ack(&Delivery::new(1, "a.b")).await.unwrap();
        subscription.nack(&Delivery::new(2, "a.b"), true).await.unwrap();
        subscription.nack(&Delivery::new(3, "a.b"), false).await.unwrap();

        assert_eq!(
            handle.settlements().await,
            vec![
                SettlementRecord::Ack { tag: 1 },
                SettlementRecord::Nack {
                    tag: 2,
                    requeue: true
                },
                SettlementRecord::Nack {
                    tag: 3,
                    requeue: false
                },
            ]
        );
        assert_eq!(handle.acked_tags().await, vec![1]);
    }

    #[tokio::test]
    async fn test_mock_settlement_failure_and_errors() {
        let mut subscription = MockSubscription::new().with_settlement_failure();
        assert!(subscription.ack(&Delivery::new(1, "a.b")).await.is_err());
        assert!(subscription.settlements().await.is_empty());

        subscription.push_error("connection reset").await;
        assert!(matches!(subscription.next_delivery().await, Some(Err(_))));

        subscription.set_connected(false);
        assert!(!subscription.is_connected());
    }

    #[tokio::test]
    async fn test_mock_function_replays_script() {
        let function = MockFunction::new();
        function
            .reply_with(TaskResult {
                body: "42".to_string(),
                ..Default::default()
            })
            .await;

        let task = Task {
            owner: "http://caller.example/cb".to_string(),
            destination: "http://orders.default.svc.cluster.local/".to_string(),
            critical: true,
            correlation_id: "cid-1".to_string(),
        };

        assert_eq!(function.invoke(&task).await.unwrap().body, "42");
        assert!(matches!(
            function.invoke(&task).await,
            Err(DispatchError::Transport { .. })
        ));
        assert_eq!(function.received().await, vec![task.clone(), task]);
    }
}
