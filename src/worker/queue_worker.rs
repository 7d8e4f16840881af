//! Sequential consume, route, dispatch, notify and settle loop
//!
//! The worker pulls one delivery at a time from its [`Subscription`] and
//! settles it before asking for the next. Settlement policy depends on the
//! configured [`DeliveryMode`]:
//!
//! - `guarded`: failures settle the single delivery (requeue once, then
//!   dead-letter) and the loop carries on. A delivery the broker already
//!   dead-lettered counts as retried.
//! - `fail_fast`: a dispatch failure stops the worker with
//!   [`RelayError::DispatchFatal`] before the delivery is acknowledged.
//!
//! Malformed routing keys are dead-lettered in both modes.

use super::settlement::{
    effective_criticality, retry_or_dead_letter, settlement_after_callback, Settlement,
};
use crate::callback::CallbackNotifier;
use crate::config::{DeliveryMode, RelaySection};
use crate::dispatch::{FunctionDispatcher, FunctionInvoker};
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{Delivery, Task};
use crate::retry::RetryPolicy;
use crate::routing::route;
use crate::transport::Subscription;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Long-running worker bound to one subscription
pub struct QueueWorker<S: Subscription, F: FunctionInvoker = FunctionDispatcher> {
    subscription: S,
    functions: F,
    notifier: CallbackNotifier,
    mode: DeliveryMode,
    shutdown: watch::Receiver<bool>,
}

impl<S: Subscription> QueueWorker<S, FunctionDispatcher> {
    /// Build the HTTP dispatcher and notifier from relay settings
    pub fn from_config(
        subscription: S,
        relay: &RelaySection,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let timeout = relay.request_timeout();
        let dispatcher = FunctionDispatcher::new(
            timeout,
            RetryPolicy::new(relay.dispatch_retries, relay.retry_backoff_ms),
        );
        let callback_retry = match relay.delivery_mode {
            DeliveryMode::Guarded => {
                RetryPolicy::new(relay.callback_retries, relay.retry_backoff_ms)
            }
            DeliveryMode::FailFast => RetryPolicy::none(),
        };
        let notifier = CallbackNotifier::new(timeout, callback_retry);

        Self::new(
            subscription,
            dispatcher,
            notifier,
            relay.delivery_mode,
            shutdown,
        )
    }
}

impl<S: Subscription, F: FunctionInvoker> QueueWorker<S, F> {
    pub fn new(
        subscription: S,
        functions: F,
        notifier: CallbackNotifier,
        mode: DeliveryMode,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            subscription,
            functions,
            notifier,
            mode,
            shutdown,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn subscription(&self) -> &S {
        &self.subscription
    }

    /// Hand the subscription back, e.g. to close the broker connection
    pub fn into_subscription(self) -> S {
        self.subscription
    }

    /// Process deliveries until the subscription ends or shutdown is signalled
    ///
    /// A delivery that has been received is always finished and settled
    /// before shutdown is honored.
    pub async fn run(&mut self) -> RelayResult<()> {
        let mut shutdown = self.shutdown.clone();
        metrics().set_relay_state("running");
        info!(mode = ?self.mode, "Queue worker started");

        let result = loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping queue worker");
                break Ok(());
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone; no shutdown can be signalled any more
                        info!("Shutdown channel closed, stopping queue worker");
                        break Ok(());
                    }
                    continue;
                }
                next = self.subscription.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(error = %e, "Subscription failed");
                    break Err(RelayError::subscription(e));
                }
                None if !self.subscription.is_connected() => {
                    error!("Subscription ended with the broker connection closed");
                    break Err(RelayError::internal_error(
                        "subscription ended after the broker connection closed",
                    ));
                }
                None => {
                    info!("Subscription ended, stopping queue worker");
                    break Ok(());
                }
            };

            if let Err(e) = self.handle_delivery(delivery).await {
                break Err(e);
            }
        };

        metrics().set_relay_state(if result.is_ok() { "stopped" } else { "failed" });
        result
    }

    /// Process and settle a single delivery
    pub async fn handle_delivery(&self, delivery: Delivery) -> RelayResult<Settlement> {
        let started = Instant::now();
        metrics().delivery_received();

        let span = crate::delivery_span!(
            delivery_tag = delivery.delivery_tag,
            routing_key = %delivery.routing_key,
            correlation_id = %delivery.correlation_id_or_empty(),
            redelivered = delivery.redelivered,
            death_count = delivery.death_count
        );

        async {
            debug!(payload = %delivery.payload_lossy(), "Delivery received");
            let settlement = self.process_delivery(&delivery).await?;
            self.settle(&delivery, &settlement, started).await?;
            Ok::<_, RelayError>(settlement)
        }
        .instrument(span)
        .await
    }

    /// Route, dispatch and notify, returning how the delivery should be settled
    ///
    /// Does not touch the subscription. In `fail_fast` mode a dispatch
    /// failure is returned as [`RelayError::DispatchFatal`].
    pub async fn process_delivery(&self, delivery: &Delivery) -> RelayResult<Settlement> {
        let route = match route(&delivery.routing_key) {
            Ok(route) => route,
            Err(e) => {
                warn!(error = %e, "Malformed routing key, dead-lettering delivery");
                metrics().malformed_routing_key();
                return Ok(Settlement::DeadLetter {
                    reason: e.to_string(),
                });
            }
        };

        let task = Task::from_delivery(delivery, &route);
        debug!(
            function = %route.function,
            destination = %task.destination,
            critical = task.critical,
            "Routed delivery"
        );

        let result = match self.functions.invoke(&task).await {
            Ok(result) => {
                metrics().dispatch_succeeded();
                result
            }
            Err(e) => {
                metrics().dispatch_failed();
                return match self.mode {
                    DeliveryMode::FailFast => {
                        error!(
                            destination = %task.destination,
                            error = %e,
                            "Function dispatch failed, aborting"
                        );
                        Err(RelayError::dispatch_fatal(task.destination.clone(), e))
                    }
                    DeliveryMode::Guarded => {
                        warn!(destination = %task.destination, error = %e, "Function dispatch failed");
                        Ok(retry_or_dead_letter(delivery.has_failed_before(), e.to_string()))
                    }
                };
            }
        };

        let critical = effective_criticality(self.mode, route.critical, result.critical);
        let outcome = self
            .notifier
            .notify(&result, delivery.reply_to_or_empty(), critical)
            .await;

        Ok(settlement_after_callback(
            self.mode,
            critical,
            &outcome,
            delivery.has_failed_before(),
        ))
    }

    async fn settle(
        &self,
        delivery: &Delivery,
        settlement: &Settlement,
        started: Instant,
    ) -> RelayResult<()> {
        match settlement {
            Settlement::Ack => {
                self.subscription
                    .ack(delivery)
                    .await
                    .map_err(RelayError::subscription)?;
                metrics().delivery_acked(started.elapsed());
                debug!("Delivery acknowledged");
            }
            Settlement::Requeue { reason } => {
                self.subscription
                    .nack(delivery, true)
                    .await
                    .map_err(RelayError::subscription)?;
                metrics().delivery_requeued(started.elapsed());
                warn!(reason = %reason, "Delivery requeued");
            }
            Settlement::DeadLetter { reason } => {
                self.subscription
                    .nack(delivery, false)
                    .await
                    .map_err(RelayError::subscription)?;
                metrics().delivery_dead_lettered(started.elapsed());
                warn!(reason = %reason, "Delivery dead-lettered");
            }
        }
        Ok(())
    }
}
