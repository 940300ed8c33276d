//! Lifecycle controller and trigger loop
//!
//! Each tick walks every pending record and runs the notify step, then the
//! destroy step. At most one tick is ever in flight; a trigger that arrives
//! while a tick is running is skipped.

use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::escalation::{EscalationManager, FailureKind};
use crate::log_lifecycle;
use crate::notify::Notifier;
use crate::provision::Provisioner;
use crate::store::LifecycleStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use timebox_common::schedule::hours;
use timebox_common::{
    compute_schedule, destroy_at_label, DestroyOutcome, Error, LifecycleRecord, Registration,
    ResourceStatus, Result, ScheduleRequest, TickReport, DESTROY_AT_LABEL, NOTIFIED_LABEL,
};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{error::Elapsed, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const MAX_RESOURCE_ID_LEN: usize = 255;

pub struct LifecycleController {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    provisioner: Arc<dyn Provisioner>,
    escalation: Arc<EscalationManager>,
    settings: ControllerConfig,
    tick_lock: Mutex<()>,
    last_tick: RwLock<Option<TickReport>>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        provisioner: Arc<dyn Provisioner>,
        escalation: Arc<EscalationManager>,
        settings: ControllerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            provisioner,
            escalation,
            settings,
            tick_lock: Mutex::new(()),
            last_tick: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn LifecycleStore> {
        &self.store
    }

    pub fn escalation(&self) -> &Arc<EscalationManager> {
        &self.escalation
    }

    pub fn settings(&self) -> &ControllerConfig {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start tracking a resource.
    ///
    /// A non-positive TTL means the resource must never be auto-destroyed:
    /// nothing is registered and any existing record is dropped.
    pub async fn register(&self, request: ScheduleRequest) -> Result<Registration> {
        validate_resource_id(&request.resource_id)?;
        let resource_id = request.resource_id.trim().to_string();
        let now = self.clock.now();

        if request.ttl_hours <= 0 {
            if self.store.remove(&resource_id).await? {
                self.escalation.resolve_resource(&resource_id, now).await;
                log_lifecycle!("ttl_disabled", resource_id);
            }
            return Ok(Registration {
                registered: false,
                record: None,
                warning: Some("TTL disabled; resource is not tracked".to_string()),
            });
        }

        let ttl = hours(request.ttl_hours)?;
        let lead = match request.notify_lead_hours {
            Some(h) => hours(h)?,
            None => Duration::seconds(self.settings.default_notify_lead_secs),
        };
        let created_at = request.created_at.unwrap_or(now);
        let schedule = compute_schedule(created_at, ttl, lead)?;

        if let Some(warning) = &schedule.warning {
            warn!(resource_id = %resource_id, %warning, "Notification lead time clamped");
        }

        if let Some(existing) = self.store.get(&resource_id).await? {
            if !existing.destroyed {
                return Err(Error::AlreadyRegistered(resource_id));
            }
            // A destroyed record may be reused by a new resource with the same id
            self.store.remove(&resource_id).await?;
        }

        let target = request
            .notification_target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let record = LifecycleRecord::new(
            resource_id.clone(),
            created_at,
            ttl,
            &schedule,
            target,
            request.locator,
            now,
        );
        self.store.put(&record).await?;
        self.escalation.resolve_resource(&resource_id, now).await;

        log_lifecycle!(
            "registered",
            resource_id,
            destroy_at = tracing::field::display(record.destroy_at),
            notify_at = tracing::field::display(record.notify_at)
        );

        let mut labels = BTreeMap::new();
        labels.insert(DESTROY_AT_LABEL.to_string(), destroy_at_label(record.destroy_at));
        self.stamp_labels(&record, labels).await;

        Ok(Registration {
            registered: true,
            record: Some(record),
            warning: schedule.warning.map(|w| w.to_string()),
        })
    }

    /// Stop tracking a resource and resolve its alerts
    pub async fn deregister(&self, resource_id: &str) -> Result<()> {
        if !self.store.remove(resource_id).await? {
            return Err(Error::ResourceNotFound(resource_id.to_string()));
        }

        self.escalation
            .resolve_resource(resource_id, self.clock.now())
            .await;
        log_lifecycle!("deregistered", resource_id);
        Ok(())
    }

    pub async fn status(&self, resource_id: &str) -> Result<ResourceStatus> {
        let record = self
            .store
            .get(resource_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;
        Ok(ResourceStatus::at(record, self.clock.now()))
    }

    pub async fn list(&self, pending_only: bool) -> Result<Vec<ResourceStatus>> {
        let now = self.clock.now();
        let records = if pending_only {
            self.store.list_pending(now).await?
        } else {
            self.store.list_all().await?
        };
        Ok(records
            .into_iter()
            .map(|r| ResourceStatus::at(r, now))
            .collect())
    }

    pub async fn last_tick(&self) -> Option<TickReport> {
        self.last_tick.read().await.clone()
    }

    pub fn tick_in_flight(&self) -> bool {
        self.tick_lock.try_lock().is_err()
    }

    /// Wait until no tick is running
    pub async fn wait_idle(&self) {
        let _guard = self.tick_lock.lock().await;
    }

    /// Run one evaluation pass. Returns `None` if another tick is in flight.
    pub async fn tick(&self) -> Option<TickReport> {
        let _guard = match self.tick_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous tick still running, skipping this trigger");
                return None;
            }
        };

        let started_at = self.clock.now();
        let mut report = TickReport {
            started_at: Some(started_at),
            ..TickReport::default()
        };

        match self.store.list_pending(started_at).await {
            Ok(pending) => {
                for record in pending {
                    report.evaluated += 1;
                    self.evaluate(record, &mut report).await;
                }
            }
            Err(e) => error!(error = %e, "Failed to list pending records"),
        }

        report.purged = self.purge().await;
        report.finished_at = Some(self.clock.now());

        info!(
            evaluated = report.evaluated,
            notified = report.notified,
            destroyed = report.destroyed,
            notify_failures = report.notify_failures,
            destroy_failures = report.destroy_failures,
            purged = report.purged,
            "Tick completed"
        );

        *self.last_tick.write().await = Some(report.clone());
        Some(report)
    }

    /// Drive ticks on the configured interval until shutdown is signalled.
    ///
    /// Shutdown is only observed between ticks, so destroy calls already
    /// issued run to completion.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if !self.settings.tick_on_startup {
            // The first interval tick completes immediately
            interval.tick().await;
        }

        info!(
            interval_secs = self.settings.tick_interval_secs,
            "Trigger loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Trigger loop stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn evaluate(&self, record: LifecycleRecord, report: &mut TickReport) {
        let now = self.clock.now();

        // Notification always precedes destruction within a tick
        if record.notify_due(now) {
            self.notify_step(&record, now, report).await;
        }

        if record.destroy_due(now) {
            self.destroy_step(&record, now, report).await;
        }
    }

    async fn notify_step(&self, record: &LifecycleRecord, now: DateTime<Utc>, report: &mut TickReport) {
        let id = record.resource_id.as_str();

        if self.escalation.is_notify_abandoned(id).await {
            debug!(resource_id = %id, "Notification target unusable, not retrying");
            return;
        }

        let Some(notice) = record.expiry_notice(now) else {
            return;
        };

        match self.bounded(self.notifier.notify(&notice)).await {
            Ok(Ok(())) => {
                if let Err(e) = self.store.mark_notified(id, now).await {
                    error!(resource_id = %id, error = %e, "Failed to persist notified flag");
                    report.notify_failures += 1;
                    return;
                }
                report.notified += 1;
                self.escalation
                    .record_success(id, FailureKind::Notify, now)
                    .await;
                log_lifecycle!("notified", id, target = notice.target.as_str());

                let mut labels = BTreeMap::new();
                labels.insert(DESTROY_AT_LABEL.to_string(), destroy_at_label(record.destroy_at));
                labels.insert(NOTIFIED_LABEL.to_string(), "true".to_string());
                self.stamp_labels(record, labels).await;
            }
            Ok(Err(e)) if e.is_permanent() => {
                report.notify_failures += 1;
                if self.escalation.abandon_notify(id).await {
                    warn!(
                        resource_id = %id,
                        target = %notice.target,
                        error = %e,
                        "Notification cannot be delivered; destruction proceeds on schedule"
                    );
                }
            }
            Ok(Err(e)) => {
                report.notify_failures += 1;
                warn!(resource_id = %id, error = %e, "Notification failed, retrying next tick");
                self.escalation
                    .record_failure(id, FailureKind::Notify, &e.to_string(), false, now)
                    .await;
            }
            Err(_) => {
                report.notify_failures += 1;
                warn!(
                    resource_id = %id,
                    timeout_secs = self.settings.call_timeout_secs,
                    "Notification timed out, retrying next tick"
                );
                self.escalation
                    .record_failure(id, FailureKind::Notify, "call timed out", false, now)
                    .await;
            }
        }
    }

    async fn destroy_step(&self, record: &LifecycleRecord, now: DateTime<Utc>, report: &mut TickReport) {
        let id = record.resource_id.as_str();

        match self.bounded(self.provisioner.destroy(&record.destroy_request())).await {
            Ok(Ok(outcome)) => {
                if let Err(e) = self.store.mark_destroyed(id, now).await {
                    // The next tick sees the resource gone and marks it then
                    error!(resource_id = %id, error = %e, "Failed to persist destroyed flag");
                    report.destroy_failures += 1;
                    return;
                }
                report.destroyed += 1;
                self.escalation.resolve_resource(id, now).await;

                let outcome = match outcome {
                    DestroyOutcome::Destroyed => "destroyed",
                    DestroyOutcome::AlreadyGone => "already_gone",
                };
                log_lifecycle!("destroyed", id, outcome = outcome);
            }
            Ok(Err(e)) => {
                report.destroy_failures += 1;
                let permanent = !e.is_transient();
                if permanent {
                    error!(resource_id = %id, error = %e, "Destroy failed permanently, will keep retrying");
                } else {
                    warn!(resource_id = %id, error = %e, "Destroy failed, retrying next tick");
                }
                self.escalation
                    .record_failure(id, FailureKind::Destroy, &e.to_string(), permanent, now)
                    .await;
            }
            Err(_) => {
                report.destroy_failures += 1;
                warn!(
                    resource_id = %id,
                    timeout_secs = self.settings.call_timeout_secs,
                    "Destroy call timed out, retrying next tick"
                );
                self.escalation
                    .record_failure(id, FailureKind::Destroy, "call timed out", false, now)
                    .await;
            }
        }
    }

    async fn stamp_labels(&self, record: &LifecycleRecord, labels: BTreeMap<String, String>) {
        let write = self
            .provisioner
            .write_labels(&record.resource_id, &record.locator, &labels);

        match self.bounded(write).await {
            Ok(Ok(())) => debug!(resource_id = %record.resource_id, "Lifecycle labels written"),
            Ok(Err(e)) => {
                warn!(resource_id = %record.resource_id, error = %e, "Failed to write lifecycle labels")
            }
            Err(_) => warn!(resource_id = %record.resource_id, "Writing lifecycle labels timed out"),
        }
    }

    async fn purge(&self) -> usize {
        let now = self.clock.now();
        let Some(cutoff) = Duration::try_hours(self.settings.destroyed_retention_hours)
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return 0;
        };

        match self.store.purge_destroyed(cutoff).await {
            Ok(purged) => {
                if purged > 0 {
                    info!(purged, "Purged destroyed records past retention");
                }
                purged
            }
            Err(e) => {
                error!(error = %e, "Failed to purge destroyed records");
                0
            }
        }
    }

    async fn bounded<F: Future>(&self, call: F) -> std::result::Result<F::Output, Elapsed> {
        tokio::time::timeout(self.settings.call_timeout(), call).await
    }
}

fn validate_resource_id(resource_id: &str) -> Result<()> {
    let id = resource_id.trim();
    if id.is_empty() {
        return Err(Error::Validation("resource_id cannot be empty".to_string()));
    }
    if id.len() > MAX_RESOURCE_ID_LEN {
        return Err(Error::Validation(format!(
            "resource_id exceeds {} characters",
            MAX_RESOURCE_ID_LEN
        )));
    }
    if id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(Error::Validation(
            "resource_id cannot contain whitespace or control characters".to_string(),
        ));
    }
    // Ids are substituted into provisioner argv; never let one parse as an option
    if id.starts_with('-') {
        return Err(Error::Validation(
            "resource_id cannot start with '-'".to_string(),
        ));
    }
    Ok(())
}
