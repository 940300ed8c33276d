//! Common types and utilities shared between timebox-controller and timebox-cli

pub mod schedule;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use schedule::{compute_schedule, destroy_at_label, Schedule, ScheduleError, ScheduleWarning};

/// Label key stamped on managed resources with the scheduled destruction time
pub const DESTROY_AT_LABEL: &str = "timebox-destroy-at";

/// Label key stamped on managed resources once the expiry notice went out
pub const NOTIFIED_LABEL: &str = "timebox-notified";

/// Default advance notice before destruction
pub const DEFAULT_NOTIFY_LEAD_SECS: i64 = 3600;

/// Lifecycle state of a managed resource, derived from its record and the current time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    PendingNotify,
    Notified,
    PendingDestroy,
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingNotify => write!(f, "pending_notify"),
            Self::Notified => write!(f, "notified"),
            Self::PendingDestroy => write!(f, "pending_destroy"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Durable lifecycle record, one per managed resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleRecord {
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: i64,
    pub notify_lead_secs: i64,
    pub destroy_at: DateTime<Utc>,
    pub notify_at: DateTime<Utc>,
    pub notified: bool,
    pub destroyed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_target: Option<String>,
    /// Addressing information the provisioning system needs (region, project, ...)
    #[serde(default)]
    pub locator: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl LifecycleRecord {
    /// Build a fresh record from a computed schedule
    pub fn new(
        resource_id: impl Into<String>,
        created_at: DateTime<Utc>,
        ttl: Duration,
        schedule: &Schedule,
        notification_target: Option<String>,
        locator: BTreeMap<String, String>,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            created_at,
            ttl_secs: ttl.num_seconds(),
            notify_lead_secs: (schedule.destroy_at - schedule.notify_at).num_seconds(),
            destroy_at: schedule.destroy_at,
            notify_at: schedule.notify_at,
            notified: false,
            destroyed: false,
            notification_target,
            locator,
            registered_at,
            notified_at: None,
            destroyed_at: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs)
    }

    pub fn notify_lead(&self) -> Duration {
        Duration::seconds(self.notify_lead_secs)
    }

    /// Whether the notification step should be attempted at `now`
    pub fn notify_due(&self, now: DateTime<Utc>) -> bool {
        !self.notified && !self.destroyed && self.notification_target.is_some() && now >= self.notify_at
    }

    /// Whether the destruction step should be attempted at `now`
    pub fn destroy_due(&self, now: DateTime<Utc>) -> bool {
        !self.destroyed && now >= self.destroy_at
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> LifecycleState {
        if self.destroyed {
            LifecycleState::Destroyed
        } else if now >= self.destroy_at {
            LifecycleState::PendingDestroy
        } else if self.notified {
            LifecycleState::Notified
        } else if self.notification_target.is_some() {
            LifecycleState::PendingNotify
        } else {
            LifecycleState::PendingDestroy
        }
    }

    pub fn destroy_request(&self) -> DestroyRequest {
        DestroyRequest {
            resource_id: self.resource_id.clone(),
            locator: self.locator.clone(),
        }
    }

    pub fn expiry_notice(&self, now: DateTime<Utc>) -> Option<ExpiryNotice> {
        self.notification_target.as_ref().map(|target| ExpiryNotice {
            resource_id: self.resource_id.clone(),
            destroy_at: self.destroy_at,
            notify_at: self.notify_at,
            current_time: now,
            target: target.clone(),
        })
    }
}

/// Schedule input sent by the provisioning system at resource-creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub resource_id: String,
    /// Defaults to the registration time when absent
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Zero or negative means "do not register for auto-destruction"
    pub ttl_hours: i64,
    #[serde(default)]
    pub notify_lead_hours: Option<i64>,
    #[serde(default)]
    pub notification_target: Option<String>,
    #[serde(default)]
    pub locator: BTreeMap<String, String>,
}

/// Payload of the pre-expiry warning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpiryNotice {
    pub resource_id: String,
    pub destroy_at: DateTime<Utc>,
    pub notify_at: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub target: String,
}

/// Payload of a destroy invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DestroyRequest {
    pub resource_id: String,
    #[serde(default)]
    pub locator: BTreeMap<String, String>,
}

/// Successful outcome of a destroy call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DestroyOutcome {
    Destroyed,
    /// The resource no longer existed; counts as success
    AlreadyGone,
}

/// Result of a registration call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<LifecycleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Record together with its derived state, as exposed to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(flatten)]
    pub record: LifecycleRecord,
    pub state: LifecycleState,
}

impl ResourceStatus {
    pub fn at(record: LifecycleRecord, now: DateTime<Utc>) -> Self {
        let state = record.state_at(now);
        Self { record, state }
    }
}

/// Summary of one trigger-loop invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub evaluated: usize,
    pub notified: usize,
    pub destroyed: usize,
    pub notify_failures: usize,
    pub destroy_failures: usize,
    pub purged: usize,
}

/// Controller error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Resource not tracked: {0}")]
    ResourceNotFound(String),

    #[error("Resource already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(target: Option<&str>) -> LifecycleRecord {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ttl = Duration::hours(4);
        let schedule = compute_schedule(created, ttl, Duration::hours(1)).unwrap();
        LifecycleRecord::new(
            "cluster-a",
            created,
            ttl,
            &schedule,
            target.map(str::to_string),
            BTreeMap::new(),
            created,
        )
    }

    #[test]
    fn test_record_from_schedule() {
        let r = record(Some("https://hooks.example.com/x"));
        assert_eq!(r.ttl_secs, 4 * 3600);
        assert_eq!(r.notify_lead_secs, 3600);
        assert_eq!(r.destroy_at - r.created_at, Duration::hours(4));
        assert_eq!(r.destroy_at - r.notify_at, Duration::hours(1));
        assert!(!r.notified);
        assert!(!r.destroyed);
    }

    #[test]
    fn test_state_progression() {
        let mut r = record(Some("ops@example.com"));
        let t = r.created_at;

        assert_eq!(r.state_at(t), LifecycleState::PendingNotify);
        assert_eq!(r.state_at(t + Duration::hours(3)), LifecycleState::PendingNotify);

        r.notified = true;
        assert_eq!(r.state_at(t + Duration::hours(3)), LifecycleState::Notified);
        assert_eq!(r.state_at(t + Duration::hours(4)), LifecycleState::PendingDestroy);

        r.destroyed = true;
        assert_eq!(r.state_at(t + Duration::hours(5)), LifecycleState::Destroyed);
    }

    #[test]
    fn test_state_without_target_skips_notify() {
        let r = record(None);
        assert_eq!(r.state_at(r.created_at), LifecycleState::PendingDestroy);
        assert!(!r.notify_due(r.notify_at));
        assert!(r.expiry_notice(r.notify_at).is_none());
    }

    #[test]
    fn test_due_checks() {
        let r = record(Some("ops@example.com"));
        assert!(!r.notify_due(r.notify_at - Duration::seconds(1)));
        assert!(r.notify_due(r.notify_at));
        assert!(!r.destroy_due(r.destroy_at - Duration::seconds(1)));
        assert!(r.destroy_due(r.destroy_at));
    }

    #[test]
    fn test_schedule_request_defaults() {
        let json = r#"{"resource_id": "cluster-a", "ttl_hours": 4}"#;
        let req: ScheduleRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ttl_hours, 4);
        assert!(req.created_at.is_none());
        assert!(req.notify_lead_hours.is_none());
        assert!(req.locator.is_empty());
    }

    #[test]
    fn test_resource_status_flattens_record() {
        let r = record(None);
        let status = ResourceStatus::at(r.clone(), r.created_at);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["resource_id"], "cluster-a");
        assert_eq!(json["state"], "pending_destroy");
    }
}
