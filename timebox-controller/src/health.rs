//! Health and readiness probes
//!
//! Components checked:
//! - the lifecycle state store
//! - trigger loop freshness
//! - outstanding critical alerts

use crate::store::LifecycleStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use timebox_common::TickReport;

/// Overall system health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Working, but something needs an operator's attention
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: i64,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub alive: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub reason: Option<String>,
    pub timestamp: i64,
}

pub struct HealthChecker {
    start_time: Instant,
    version: String,
}

impl HealthChecker {
    pub fn new(version: &str) -> Self {
        Self {
            start_time: Instant::now(),
            version: version.to_string(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn liveness(&self) -> LivenessResponse {
        LivenessResponse {
            alive: true,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub async fn check_store(&self, store: &dyn LifecycleStore) -> ComponentHealth {
        let start = Instant::now();

        match store.health_check().await {
            Ok(()) => ComponentHealth {
                name: "store".to_string(),
                status: HealthStatus::Healthy,
                message: Some(format!("{} backend reachable", store.backend())),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => ComponentHealth {
                name: "store".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some(format!("Store check failed: {}", e)),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
        }
    }

    /// The loop is stale once two intervals pass without a finished tick
    pub fn check_trigger_loop(
        &self,
        last_tick: Option<&TickReport>,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> ComponentHealth {
        let grace = interval.saturating_mul(2);
        let finished = last_tick.and_then(|t| t.finished_at);

        let (status, message) = match finished {
            Some(at) => {
                let age = (now - at).to_std().unwrap_or_default();
                if age <= grace {
                    (
                        HealthStatus::Healthy,
                        format!("Last tick finished {}s ago", age.as_secs()),
                    )
                } else {
                    (
                        HealthStatus::Degraded,
                        format!("No tick for {}s", age.as_secs()),
                    )
                }
            }
            None if self.start_time.elapsed() <= grace => {
                (HealthStatus::Healthy, "Waiting for first tick".to_string())
            }
            None => (
                HealthStatus::Degraded,
                "No tick has completed since startup".to_string(),
            ),
        };

        ComponentHealth {
            name: "trigger_loop".to_string(),
            status,
            message: Some(message),
            latency_ms: None,
        }
    }

    pub fn check_alerts(&self, active: usize, critical: usize) -> ComponentHealth {
        let status = if critical > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        ComponentHealth {
            name: "escalations".to_string(),
            status,
            message: Some(format!("{} active alert(s), {} critical", active, critical)),
            latency_ms: None,
        }
    }

    fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
        let mut has_unhealthy = false;
        let mut has_degraded = false;

        for component in components {
            match component.status {
                HealthStatus::Unhealthy => has_unhealthy = true,
                HealthStatus::Degraded => has_degraded = true,
                HealthStatus::Healthy => {}
            }
        }

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn build_response(&self, components: Vec<ComponentHealth>) -> HealthResponse {
        let status = Self::aggregate_status(&components);

        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_seconds: self.uptime_seconds(),
            timestamp: Utc::now().timestamp(),
            components,
        }
    }

    /// Ready once the store answers
    pub fn readiness(&self, components: &[ComponentHealth]) -> ReadinessResponse {
        let store_healthy = components
            .iter()
            .find(|c| c.name == "store")
            .map(|c| c.status == HealthStatus::Healthy)
            .unwrap_or(false);

        ReadinessResponse {
            ready: store_healthy,
            reason: (!store_healthy).then(|| "State store not ready".to_string()),
            timestamp: Utc::now().timestamp(),
        }
    }
}
