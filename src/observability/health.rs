//! Health check HTTP server for container orchestration
//!
//! Provides HTTP endpoints for monitoring relay status, supporting both
//! human operators and container orchestration platforms.

use crate::observability::metrics::{current_timestamp, metrics};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    relay_id: String,
    port: u16,
    broker_connected: Arc<AtomicBool>,
    additional_checks: Arc<RwLock<HashMap<String, HealthCheck>>>,
}

impl HealthServer {
    /// Create new health server
    pub fn new(relay_id: String, port: u16) -> Self {
        Self {
            relay_id,
            port,
            broker_connected: Arc::new(AtomicBool::new(false)),
            additional_checks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Update broker connection status
    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    /// Add custom health check
    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        let mut checks = self.additional_checks.write().await;
        checks.insert(name, check);
    }

    /// Remove health check
    pub async fn remove_health_check(&self, name: &str) {
        let mut checks = self.additional_checks.write().await;
        checks.remove(name);
    }

    /// Route table served by [`HealthServer::start`]
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - overall status with individual checks
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&metrics().get_metrics()))
        });

        // GET /ready - readiness follows the broker connection
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.broker_connected.load(Ordering::Relaxed);
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).and_then(|| async {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        health_route.or(metrics_route).or(ready_route).or(live_route)
    }

    /// Start the HTTP health server
    pub async fn start(self: Arc<Self>) {
        let port = self.port;
        let routes = self.routes();

        tracing::info!("Starting health server on port {}", port);
        warp::serve(routes).run(([0, 0, 0, 0], port)).await;
    }

    async fn get_health_status(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("broker".to_string(), self.check_broker_health());
        checks.insert("deliveries".to_string(), self.check_delivery_activity());

        let additional = self.additional_checks.read().await;
        for (name, check) in additional.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let overall_healthy = checks.values().all(|check| check.status == "healthy");

        HealthStatus {
            status: if overall_healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: current_timestamp(),
            relay_id: self.relay_id.clone(),
            uptime_seconds: metrics().uptime_seconds(),
            checks,
        }
    }

    fn check_broker_health(&self) -> HealthCheck {
        let connected = self.broker_connected.load(Ordering::Relaxed);

        HealthCheck {
            status: if connected { "healthy" } else { "unhealthy" }.to_string(),
            message: Some(if connected {
                "Broker connection established".to_string()
            } else {
                "Broker connection failed or not yet established".to_string()
            }),
            last_check: current_timestamp(),
        }
    }

    /// An idle queue is normal for a relay, so this check only reports activity
    fn check_delivery_activity(&self) -> HealthCheck {
        let now = current_timestamp();
        let last = metrics().last_delivery_settled();

        let message = if last == 0 {
            "No deliveries processed yet".to_string()
        } else {
            format!("Last delivery settled {} seconds ago", now.saturating_sub(last))
        };

        HealthCheck {
            status: "healthy".to_string(),
            message: Some(message),
            last_check: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    relay_id: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}
