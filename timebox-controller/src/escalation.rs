//! Failure escalation
//!
//! Counts consecutive failed ticks per resource and operation, and raises
//! persistent alerts for failures a human has to look at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const MAX_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Notify,
    Destroy,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Notify => write!(f, "notify"),
            FailureKind::Destroy => write!(f, "destroy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub resource_id: String,
    pub kind: FailureKind,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    pub consecutive_failures: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct FailureCounter {
    consecutive: u32,
    first_failed_at: DateTime<Utc>,
}

type Key = (String, FailureKind);

/// Posts fired and resolved alerts to an operator endpoint
struct AlertWebhook {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct AlertEvent<'a> {
    event: &'static str,
    alert: &'a Alert,
}

impl AlertWebhook {
    async fn post(&self, event: &'static str, alert: &Alert) {
        let result = self
            .client
            .post(&self.url)
            .json(&AlertEvent { event, alert })
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => tracing::warn!(
                status = %response.status(),
                alert_id = %alert.id,
                "Alert webhook rejected delivery"
            ),
            Err(e) => tracing::warn!(error = %e, alert_id = %alert.id, "Alert webhook delivery failed"),
        }
    }
}

pub struct EscalationManager {
    threshold: u32,
    counters: Arc<RwLock<HashMap<Key, FailureCounter>>>,
    active: Arc<RwLock<HashMap<Key, Alert>>>,
    history: Arc<RwLock<Vec<Alert>>>,
    abandoned_notify: Arc<RwLock<HashSet<String>>>,
    webhook: Option<AlertWebhook>,
}

impl EscalationManager {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counters: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            abandoned_notify: Arc::new(RwLock::new(HashSet::new())),
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        self.webhook = Some(AlertWebhook {
            client,
            url: url.into(),
        });
        Ok(self)
    }

    /// Record one failed attempt. Returns the alert if this failure fired
    /// or escalated one.
    pub async fn record_failure(
        &self,
        resource_id: &str,
        kind: FailureKind,
        error: &str,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let key = (resource_id.to_string(), kind);

        let counter = {
            let mut counters = self.counters.write().await;
            let counter = counters.entry(key.clone()).or_insert(FailureCounter {
                consecutive: 0,
                first_failed_at: now,
            });
            counter.consecutive += 1;
            counter.clone()
        };

        let severity = if permanent {
            Some(AlertSeverity::Critical)
        } else if counter.consecutive >= self.threshold {
            Some(AlertSeverity::Warning)
        } else {
            None
        };

        let mut active = self.active.write().await;

        if let Some(alert) = active.get_mut(&key) {
            alert.consecutive_failures = counter.consecutive;
            alert.last_failed_at = now;
            alert.message = format!("{} failed: {}", kind, error);
            match severity {
                Some(s) if s > alert.severity => {
                    alert.severity = s;
                    let alert = alert.clone();
                    drop(active);
                    tracing::error!(
                        resource_id = %resource_id,
                        kind = %kind,
                        severity = ?alert.severity,
                        "Alert escalated"
                    );
                    self.publish("alert.escalated", &alert).await;
                    return Some(alert);
                }
                _ => return None,
            }
        }

        let severity = severity?;
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.to_string(),
            kind,
            severity,
            status: AlertStatus::Firing,
            message: format!("{} failed: {}", kind, error),
            consecutive_failures: counter.consecutive,
            first_failed_at: counter.first_failed_at,
            last_failed_at: now,
            fired_at: now,
            resolved_at: None,
        };
        active.insert(key, alert.clone());
        drop(active);

        tracing::error!(
            resource_id = %resource_id,
            kind = %kind,
            severity = ?severity,
            consecutive_failures = counter.consecutive,
            error = %error,
            "Alert fired"
        );
        self.publish("alert.fired", &alert).await;
        Some(alert)
    }

    /// Clear the failure streak and resolve any alert for this operation
    pub async fn record_success(&self, resource_id: &str, kind: FailureKind, now: DateTime<Utc>) {
        let key = (resource_id.to_string(), kind);
        self.counters.write().await.remove(&key);

        let resolved = self.active.write().await.remove(&key);
        if let Some(alert) = resolved {
            self.archive(alert, now).await;
        }
    }

    /// Forget everything about a resource that is no longer tracked
    pub async fn resolve_resource(&self, resource_id: &str, now: DateTime<Utc>) {
        self.counters
            .write()
            .await
            .retain(|(id, _), _| id != resource_id);
        self.abandoned_notify.write().await.remove(resource_id);

        let resolved: Vec<Alert> = {
            let mut active = self.active.write().await;
            let keys: Vec<Key> = active
                .keys()
                .filter(|(id, _)| id == resource_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| active.remove(k)).collect()
        };

        for alert in resolved {
            self.archive(alert, now).await;
        }
    }

    /// Stop notifying a resource whose target can never be reached
    pub async fn abandon_notify(&self, resource_id: &str) -> bool {
        self.abandoned_notify
            .write()
            .await
            .insert(resource_id.to_string())
    }

    pub async fn is_notify_abandoned(&self, resource_id: &str) -> bool {
        self.abandoned_notify.read().await.contains(resource_id)
    }

    pub async fn consecutive_failures(&self, resource_id: &str, kind: FailureKind) -> u32 {
        self.counters
            .read()
            .await
            .get(&(resource_id.to_string(), kind))
            .map_or(0, |c| c.consecutive)
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.read().await.values().cloned().collect();
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.fired_at.cmp(&b.fired_at)));
        alerts
    }

    pub async fn critical_count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count()
    }

    /// Most recent first
    pub async fn history(&self, limit: Option<usize>) -> Vec<Alert> {
        let history = self.history.read().await;
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    async fn archive(&self, mut alert: Alert, now: DateTime<Utc>) {
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);

        tracing::info!(
            resource_id = %alert.resource_id,
            kind = %alert.kind,
            "Alert resolved"
        );

        {
            let mut history = self.history.write().await;
            history.push(alert.clone());
            if history.len() > MAX_HISTORY {
                let excess = history.len() - MAX_HISTORY;
                history.drain(..excess);
            }
        }

        self.publish("alert.resolved", &alert).await;
    }

    async fn publish(&self, event: &'static str, alert: &Alert) {
        if let Some(webhook) = &self.webhook {
            webhook.post(event, alert).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_transient_failures_escalate_at_threshold() {
        let manager = EscalationManager::new(3);

        assert!(manager
            .record_failure("vm-1", FailureKind::Destroy, "timeout", false, now())
            .await
            .is_none());
        assert!(manager
            .record_failure("vm-1", FailureKind::Destroy, "timeout", false, now())
            .await
            .is_none());

        let alert = manager
            .record_failure("vm-1", FailureKind::Destroy, "timeout", false, now())
            .await
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.consecutive_failures, 3);

        // Further failures update the same alert
        assert!(manager
            .record_failure("vm-1", FailureKind::Destroy, "timeout", false, now())
            .await
            .is_none());
        let active = manager.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].consecutive_failures, 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_critical_immediately() {
        let manager = EscalationManager::new(5);
        let alert = manager
            .record_failure("vm-1", FailureKind::Destroy, "403 Forbidden", true, now())
            .await
            .unwrap();

        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(manager.critical_count().await, 1);
    }

    #[tokio::test]
    async fn test_warning_upgrades_to_critical() {
        let manager = EscalationManager::new(1);
        manager
            .record_failure("vm-1", FailureKind::Destroy, "timeout", false, now())
            .await
            .unwrap();
        let upgraded = manager
            .record_failure("vm-1", FailureKind::Destroy, "403", true, now())
            .await
            .unwrap();

        assert_eq!(upgraded.severity, AlertSeverity::Critical);
        assert_eq!(manager.active_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_success_resolves_alert() {
        let manager = EscalationManager::new(1);
        manager
            .record_failure("vm-1", FailureKind::Destroy, "timeout", false, now())
            .await;
        manager
            .record_success("vm-1", FailureKind::Destroy, now())
            .await;

        assert!(manager.active_alerts().await.is_empty());
        assert_eq!(
            manager.consecutive_failures("vm-1", FailureKind::Destroy).await,
            0
        );

        let history = manager.history(None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, AlertStatus::Resolved);
        assert_eq!(history[0].resolved_at, Some(now()));
    }

    #[tokio::test]
    async fn test_resolve_resource_clears_everything() {
        let manager = EscalationManager::new(1);
        manager
            .record_failure("vm-1", FailureKind::Notify, "503", false, now())
            .await;
        manager
            .record_failure("vm-1", FailureKind::Destroy, "403", true, now())
            .await;
        manager
            .record_failure("vm-2", FailureKind::Destroy, "503", false, now())
            .await;
        assert!(manager.abandon_notify("vm-1").await);

        manager.resolve_resource("vm-1", now()).await;

        let active = manager.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].resource_id, "vm-2");
        assert!(!manager.is_notify_abandoned("vm-1").await);
        assert_eq!(manager.history(Some(10)).await.len(), 2);
    }

    #[tokio::test]
    async fn test_counters_are_per_kind() {
        let manager = EscalationManager::new(2);
        manager
            .record_failure("vm-1", FailureKind::Notify, "503", false, now())
            .await;
        assert!(manager
            .record_failure("vm-1", FailureKind::Destroy, "503", false, now())
            .await
            .is_none());
    }
}
