//! Shared fakes and harness for controller integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use timebox_common::{DestroyOutcome, DestroyRequest, ExpiryNotice, ScheduleRequest};
use timebox_controller::clock::ManualClock;
use timebox_controller::config::ControllerConfig;
use timebox_controller::escalation::EscalationManager;
use timebox_controller::notify::{Notifier, NotifyError};
use timebox_controller::provision::{ProvisionError, Provisioner};
use timebox_controller::store::{LifecycleStore, MemoryStore};
use timebox_controller::LifecycleController;

/// Ordered record of every external call made by the fakes
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Creation time used by most scenarios
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn request(id: &str, ttl_hours: i64, lead_hours: i64, target: Option<&str>) -> ScheduleRequest {
    let mut locator = BTreeMap::new();
    locator.insert("project".to_string(), "sandbox".to_string());
    ScheduleRequest {
        resource_id: id.to_string(),
        created_at: Some(t0()),
        ttl_hours,
        notify_lead_hours: Some(lead_hours),
        notification_target: target.map(str::to_string),
        locator,
    }
}

#[derive(Default)]
pub struct ScriptedNotifier {
    script: Mutex<HashMap<String, VecDeque<Result<(), NotifyError>>>>,
    pub notices: Mutex<Vec<ExpiryNotice>>,
    events: EventLog,
}

impl ScriptedNotifier {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Queue results for a resource; once exhausted, calls succeed
    pub fn script(&self, resource_id: &str, results: Vec<Result<(), NotifyError>>) {
        self.script
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), results.into());
    }

    pub fn calls_for(&self, resource_id: &str) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.resource_id == resource_id)
            .count()
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn notify(&self, notice: &ExpiryNotice) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("notify:{}", notice.resource_id));
        self.notices.lock().unwrap().push(notice.clone());

        self.script
            .lock()
            .unwrap()
            .get_mut(&notice.resource_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(()))
    }
}

#[derive(Default)]
pub struct ScriptedProvisioner {
    script: Mutex<HashMap<String, VecDeque<Result<DestroyOutcome, ProvisionError>>>>,
    pub destroy_calls: Mutex<Vec<DestroyRequest>>,
    pub labels: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    delay: Mutex<Option<std::time::Duration>>,
    events: EventLog,
}

impl ScriptedProvisioner {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Queue results for a resource; once exhausted, calls report `Destroyed`
    pub fn script(&self, resource_id: &str, results: Vec<Result<DestroyOutcome, ProvisionError>>) {
        self.script
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), results.into());
    }

    /// Make every destroy call take this long
    pub fn slow_down(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls_for(&self, resource_id: &str) -> usize {
        self.destroy_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .count()
    }

    pub fn labels_for(&self, resource_id: &str) -> Vec<BTreeMap<String, String>> {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == resource_id)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    async fn destroy(&self, request: &DestroyRequest) -> Result<DestroyOutcome, ProvisionError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("destroy:{}", request.resource_id));
        self.destroy_calls.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .unwrap()
            .get_mut(&request.resource_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(DestroyOutcome::Destroyed))
    }

    async fn write_labels(
        &self,
        resource_id: &str,
        _locator: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionError> {
        self.labels
            .lock()
            .unwrap()
            .push((resource_id.to_string(), labels.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct Harness {
    pub controller: Arc<LifecycleController>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<ScriptedNotifier>,
    pub provisioner: Arc<ScriptedProvisioner>,
    pub store: Arc<dyn LifecycleStore>,
    pub events: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: ControllerConfig) -> Self {
        Self::build(Arc::new(MemoryStore::new()), settings)
    }

    pub fn build(store: Arc<dyn LifecycleStore>, settings: ControllerConfig) -> Self {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(ScriptedNotifier::new(events.clone()));
        let provisioner = Arc::new(ScriptedProvisioner::new(events.clone()));
        let escalation = Arc::new(EscalationManager::new(settings.escalation_threshold));

        let controller = Arc::new(LifecycleController::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
            provisioner.clone(),
            escalation,
            settings,
        ));

        Self {
            controller,
            clock,
            notifier,
            provisioner,
            store,
            events,
        }
    }

    /// Set the clock to `t0 + offset` and run a tick
    pub async fn tick_at(&self, offset: Duration) -> timebox_common::TickReport {
        self.clock.set(t0() + offset);
        self.controller
            .tick()
            .await
            .expect("no other tick should be in flight")
    }

    pub async fn record(&self, id: &str) -> timebox_common::LifecycleRecord {
        self.store
            .get(id)
            .await
            .unwrap()
            .expect("record should exist")
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

pub fn test_settings() -> ControllerConfig {
    ControllerConfig {
        tick_interval_secs: 3600,
        call_timeout_secs: 5,
        default_notify_lead_secs: 3600,
        escalation_threshold: 3,
        destroyed_retention_hours: 168,
        tick_on_startup: true,
    }
}

pub fn hours(h: i64) -> Duration {
    Duration::hours(h)
}
