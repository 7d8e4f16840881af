//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected sample buffer for tracking
//! deliveries, function dispatches, callbacks and the broker connection.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Delivery settlement
    deliveries_received: AtomicU64,
    deliveries_acked: AtomicU64,
    deliveries_requeued: AtomicU64,
    deliveries_dead_lettered: AtomicU64,
    malformed_routing_keys: AtomicU64,
    last_delivery_settled: AtomicU64,

    // Function dispatch
    dispatches_succeeded: AtomicU64,
    dispatches_failed: AtomicU64,

    // Callbacks
    callbacks_delivered: AtomicU64,
    callbacks_failed: AtomicU64,
    critical_callbacks_failed: AtomicU64,
    callbacks_skipped: AtomicU64,

    // Broker connection
    broker_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connection_failures: AtomicU64,

    // End-to-end pipeline times in milliseconds
    processing_times: Mutex<Vec<u64>>,

    relay_state: Mutex<String>,
    uptime_start: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            deliveries_received: AtomicU64::new(0),
            deliveries_acked: AtomicU64::new(0),
            deliveries_requeued: AtomicU64::new(0),
            deliveries_dead_lettered: AtomicU64::new(0),
            malformed_routing_keys: AtomicU64::new(0),
            last_delivery_settled: AtomicU64::new(0),
            dispatches_succeeded: AtomicU64::new(0),
            dispatches_failed: AtomicU64::new(0),
            callbacks_delivered: AtomicU64::new(0),
            callbacks_failed: AtomicU64::new(0),
            critical_callbacks_failed: AtomicU64::new(0),
            callbacks_skipped: AtomicU64::new(0),
            broker_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            relay_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Delivery metrics
    pub fn delivery_received(&self) {
        self.deliveries_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_acked(&self, duration: Duration) {
        self.deliveries_acked.fetch_add(1, Ordering::Relaxed);
        self.delivery_settled(duration);
    }

    pub fn delivery_requeued(&self, duration: Duration) {
        self.deliveries_requeued.fetch_add(1, Ordering::Relaxed);
        self.delivery_settled(duration);
    }

    pub fn delivery_dead_lettered(&self, duration: Duration) {
        self.deliveries_dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.delivery_settled(duration);
    }

    pub fn malformed_routing_key(&self) {
        self.malformed_routing_keys.fetch_add(1, Ordering::Relaxed);
    }

    fn delivery_settled(&self, duration: Duration) {
        self.last_delivery_settled
            .store(current_timestamp(), Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);

            if times.len() > MAX_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Dispatch metrics
    pub fn dispatch_succeeded(&self) {
        self.dispatches_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_failed(&self) {
        self.dispatches_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Callback metrics
    pub fn callback_delivered(&self) {
        self.callbacks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_failed(&self, critical: bool) {
        self.callbacks_failed.fetch_add(1, Ordering::Relaxed);
        if critical {
            self.critical_callbacks_failed
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn callback_skipped(&self) {
        self.callbacks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    // Broker metrics
    pub fn broker_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_connection_established(&self) {
        self.broker_connected.store(true, Ordering::Relaxed);
    }

    pub fn broker_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    pub fn broker_connection_lost(&self) {
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    pub fn is_broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }

    // Lifecycle
    pub fn set_relay_state(&self, state: &str) {
        if let Ok(mut current) = self.relay_state.lock() {
            *current = state.to_string();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        current_timestamp().saturating_sub(self.uptime_start.load(Ordering::Relaxed))
    }

    /// Seconds since epoch of the last settled delivery, 0 if none yet
    pub fn last_delivery_settled(&self) -> u64 {
        self.last_delivery_settled.load(Ordering::Relaxed)
    }

    /// Calculate processing time statistics (avg, p50, p95, p99)
    fn processing_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    /// Get current metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let (avg, p50, p95, p99) = self.processing_time_statistics();
        let relay_state = self
            .relay_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            timestamp: current_timestamp(),
            deliveries: DeliveryMetrics {
                received: self.deliveries_received.load(Ordering::Relaxed),
                acked: self.deliveries_acked.load(Ordering::Relaxed),
                requeued: self.deliveries_requeued.load(Ordering::Relaxed),
                dead_lettered: self.deliveries_dead_lettered.load(Ordering::Relaxed),
                malformed_routing_keys: self.malformed_routing_keys.load(Ordering::Relaxed),
                last_settled: self.last_delivery_settled.load(Ordering::Relaxed),
                avg_processing_time_ms: avg,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
                processing_time_p99_ms: p99,
            },
            dispatch: DispatchMetrics {
                succeeded: self.dispatches_succeeded.load(Ordering::Relaxed),
                failed: self.dispatches_failed.load(Ordering::Relaxed),
            },
            callbacks: CallbackMetrics {
                delivered: self.callbacks_delivered.load(Ordering::Relaxed),
                failed: self.callbacks_failed.load(Ordering::Relaxed),
                critical_failed: self.critical_callbacks_failed.load(Ordering::Relaxed),
                skipped: self.callbacks_skipped.load(Ordering::Relaxed),
            },
            broker: BrokerMetrics {
                connected: self.broker_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                state: relay_state,
                uptime_seconds: self.uptime_seconds(),
            },
        }
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub deliveries: DeliveryMetrics,
    pub dispatch: DispatchMetrics,
    pub callbacks: CallbackMetrics,
    pub broker: BrokerMetrics,
    pub lifecycle: LifecycleMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryMetrics {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub malformed_routing_keys: u64,
    pub last_settled: u64,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
    pub processing_time_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchMetrics {
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackMetrics {
    pub delivered: u64,
    pub failed: u64,
    pub critical_failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connection_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleMetrics {
    pub state: String,
    pub uptime_seconds: u64,
}

fn percentile(sorted_values: &[u64], percentile: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_values.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_values[lower] as f64
    } else {
        let weight = index - lower as f64;
        sorted_values[lower] as f64 * (1.0 - weight) + sorted_values[upper] as f64 * weight
    }
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
