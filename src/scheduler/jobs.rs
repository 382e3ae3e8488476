//! Default job table and the periodic job bodies that do not live in a
//! component of their own.

use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::alerts::{
    AlertDraft, AlertEngine, AlertPriority, AlertType, MonitorHarness, RemediationAction,
};
use crate::assignment::AssignmentQueue;
use crate::config::WardflowConfig;
use crate::constants::capacity::PREDICTED_CRITICAL_PCT;
use crate::error::Result;
use crate::models::OperationalLogEntry;
use crate::scheduler::{JobPriority, ScheduledJob};
use crate::store::{PatientFilter, ResourceStore};
use crate::workflow::templates::DISCHARGE_PREPARATION;
use crate::workflow::{ActionKind, WorkflowExecutor};

/// Everything the default jobs need, threaded explicitly.
#[derive(Clone)]
pub struct JobDeps {
    pub store: Arc<dyn ResourceStore>,
    pub queue: Arc<AssignmentQueue>,
    pub executor: Arc<WorkflowExecutor>,
    pub alerts: Arc<AlertEngine>,
    pub harness: Arc<MonitorHarness>,
    pub config: WardflowConfig,
}

/// The static job table built at startup.
pub fn default_jobs(deps: &JobDeps) -> Vec<ScheduledJob> {
    let max_runtime = Duration::from_secs(deps.config.scheduler.default_max_runtime_secs);
    let max_retries = deps.config.scheduler.default_max_retries;
    let job = |id: &str, priority: JobPriority, interval_secs: u64, handler| {
        ScheduledJob::new(id, priority, Duration::from_secs(interval_secs), handler)
            .with_max_retries(max_retries)
            .with_max_runtime(max_runtime)
    };

    let queue = deps.queue.clone();
    let queue_drain = job(
        "queue_drain",
        JobPriority::Critical,
        30,
        Arc::new(move || {
            let queue = queue.clone();
            async move { queue.drain().await.map(|_| ()) }.boxed()
        }),
    );

    let harness = deps.harness.clone();
    let monitor_sweep = job(
        "monitor_sweep",
        JobPriority::High,
        120,
        Arc::new(move || {
            let harness = harness.clone();
            async move {
                harness.run_all().await;
                Ok(())
            }
            .boxed()
        }),
    );

    let alerts = deps.alerts.clone();
    let alert_sweep = job(
        "alert_sweep",
        JobPriority::High,
        60,
        Arc::new(move || {
            let alerts = alerts.clone();
            async move { alerts.sweep().await.map(|_| ()) }.boxed()
        }),
    );

    let predictive_deps = deps.clone();
    let predictive = job(
        "predictive_occupancy",
        JobPriority::High,
        900,
        Arc::new(move || {
            let deps = predictive_deps.clone();
            async move { predictive_occupancy_check(&deps).await }.boxed()
        }),
    );

    let discharge_deps = deps.clone();
    let discharge_planning = job(
        "discharge_planning",
        JobPriority::Medium,
        600,
        Arc::new(move || {
            let deps = discharge_deps.clone();
            async move { discharge_planning_sweep(&deps).await }.boxed()
        }),
    );

    let executor = deps.executor.clone();
    let workflow_sweep = job(
        "workflow_sweep",
        JobPriority::Medium,
        300,
        Arc::new(move || {
            let executor = executor.clone();
            async move { executor.sweep().await.map(|_| ()) }.boxed()
        }),
    );

    let health_deps = deps.clone();
    let health_snapshot = job(
        "health_snapshot",
        JobPriority::Low,
        60,
        Arc::new(move || {
            let deps = health_deps.clone();
            async move { health_snapshot(&deps).await }.boxed()
        }),
    );

    vec![
        queue_drain,
        monitor_sweep,
        alert_sweep,
        predictive,
        discharge_planning,
        workflow_sweep,
        health_snapshot,
    ]
}

/// Deterministic occupancy projection: current occupancy plus pending
/// admissions minus discharges expected inside the horizon. Crossing
/// the predicted-critical threshold raises a proactive capacity alert.
pub async fn predictive_occupancy_check(deps: &JobDeps) -> Result<()> {
    let census = deps.store.ward_census().await?;
    let total: usize = census.values().map(|c| c.total).sum();
    if total == 0 {
        return Ok(());
    }
    let occupied: usize = census.values().map(|c| c.occupied).sum();

    let pending = deps.queue.depth();
    let mut filter = PatientFilter::active();
    filter.discharge_within_hours = Some(deps.config.alerts.discharge_horizon_hours);
    let departures = deps
        .store
        .query_patients(&filter)
        .await?
        .into_iter()
        .filter(|p| p.current_bed.is_some())
        .count();

    let projected = (occupied + pending).saturating_sub(departures) as f64 / total as f64 * 100.0;
    info!(
        occupied,
        pending,
        departures,
        projected_pct = projected,
        "🔮 Predictive occupancy check"
    );
    if projected < PREDICTED_CRITICAL_PCT {
        return Ok(());
    }

    let most_pressured = census
        .iter()
        .max_by(|a, b| {
            a.1.occupancy_rate()
                .partial_cmp(&b.1.occupancy_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(ward, _)| ward.clone());

    let mut draft = AlertDraft::new(
        AlertType::CapacityCritical,
        AlertPriority::Critical,
        "Projected critical occupancy",
        format!(
            "Projected occupancy {projected:.0}% ({occupied} occupied, {pending} queued, {departures} departing)"
        ),
    )
    .meta("projected_pct", json!(projected));
    if let Some(ward) = most_pressured {
        draft = draft.action(
            RemediationAction::new(
                "expedite_cleaning",
                "Expedite cleanings in the most pressured ward",
                ActionKind::NotifyHousekeeping,
            )
            .gated()
            .with_params(json!({"expedite_ward_cleaning": ward.as_str()})),
        );
    }
    deps.alerts.create(draft).await?;
    Ok(())
}

/// Start discharge preparation for patients inside the planning window.
/// The duplicate guard keeps repeat sweeps from stacking workflows.
pub async fn discharge_planning_sweep(deps: &JobDeps) -> Result<()> {
    let mut filter = PatientFilter::active();
    filter.discharge_within_hours = Some(deps.config.alerts.discharge_horizon_hours);
    let departing = deps.store.query_patients(&filter).await?;

    let mut started = 0usize;
    for patient in departing.into_iter().filter(|p| p.current_bed.is_some()) {
        match deps
            .executor
            .create_guarded(DISCHARGE_PREPARATION, json!({"patient_id": patient.id.as_str()}))
            .await
        {
            Ok(Some(_)) => started += 1,
            Ok(None) => {}
            Err(e) => {
                warn!(patient_id = %patient.id, error = %e, "Discharge workflow rejected");
            }
        }
    }
    if started > 0 {
        info!(started, "🚪 Discharge preparation workflows started");
    }
    Ok(())
}

/// Append a one-line operational snapshot to the audit log.
pub async fn health_snapshot(deps: &JobDeps) -> Result<()> {
    let queue_status = deps.queue.queue_status();
    let details = format!(
        "queue_depth={} active_workflows={} active_alerts={} monitors_degraded={}",
        queue_status.depth,
        deps.executor.active_count(),
        deps.alerts.active_count(),
        deps.harness.is_degraded(),
    );
    deps.store
        .append_log(OperationalLogEntry::new(
            "scheduler",
            "health_snapshot",
            details,
            "success",
        ))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::events::EventPublisher;
    use crate::models::{
        AssignmentRequest, Bed, BedId, BedKind, BedStatus, Patient, PatientId, Priority,
        RequirementSet, UrgencyClass, Ward,
    };
    use crate::store::memory::MemoryStore;
    use crate::workflow::ActionRegistry;
    use tokio::sync::mpsc;

    fn deps() -> (JobDeps, Arc<MemoryStore>) {
        let config = WardflowConfig::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn ResourceStore> = memory.clone();
        let publisher = Arc::new(EventPublisher::default());
        let registry = Arc::new(ActionRegistry::builtin());
        let alerts = Arc::new(AlertEngine::new(
            store.clone(),
            publisher.clone(),
            registry.clone(),
            config.alerts.clone(),
            config.scoring.clone(),
            tx,
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            publisher.clone(),
            registry,
            alerts.clone(),
            config.workflow.clone(),
            config.scoring.clone(),
            rx,
        ));
        let queue = Arc::new(AssignmentQueue::new(
            store.clone(),
            publisher,
            alerts.clone(),
            executor.clone(),
            config.scoring.clone(),
            config.queue.clone(),
        ));
        let harness = Arc::new(MonitorHarness::new(crate::alerts::MonitorContext {
            store: store.clone(),
            alerts: alerts.clone(),
            config: config.alerts.clone(),
        }));
        (
            JobDeps {
                store,
                queue,
                executor,
                alerts,
                harness,
                config,
            },
            memory,
        )
    }

    #[test]
    fn test_default_job_table() {
        let (deps, _store) = deps();
        let jobs = default_jobs(&deps);
        assert_eq!(jobs.len(), 7);
        let drain = jobs.iter().find(|j| j.id == "queue_drain").unwrap();
        assert_eq!(drain.priority, JobPriority::Critical);
        assert_eq!(drain.interval, Duration::from_secs(30));
        let sweep = jobs.iter().find(|j| j.id == "workflow_sweep").unwrap();
        assert_eq!(sweep.interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_predictive_check_alerts_on_projected_pressure() {
        let (deps, store) = deps();
        // One bed occupied, deep queue: projection far over threshold
        let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
        bed.transition(BedStatus::Occupied, Some(PatientId::new("P0")))
            .unwrap();
        store.put_bed(bed).await.unwrap();
        store
            .put_patient(Patient::new(PatientId::new("P1"), UrgencyClass::Medium))
            .await
            .unwrap();
        deps.queue
            .submit(AssignmentRequest::new(
                PatientId::new("P1"),
                Priority::Medium,
                RequirementSet::default(),
            ))
            .await
            .unwrap();

        predictive_occupancy_check(&deps).await.unwrap();
        let active = deps.alerts.list_active(&crate::alerts::AlertFilter::default());
        assert!(active
            .iter()
            .any(|a| a.alert_type == AlertType::CapacityCritical));
    }

    #[tokio::test]
    async fn test_predictive_check_quiet_when_discharges_offset() {
        let (deps, store) = deps();
        let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
        bed.transition(BedStatus::Occupied, Some(PatientId::new("P0")))
            .unwrap();
        store.put_bed(bed).await.unwrap();
        // The occupant departs within the horizon and nothing is queued
        let mut patient = Patient::new(PatientId::new("P0"), UrgencyClass::Medium);
        patient.current_bed = Some(BedId::new("G-1"));
        patient.expected_discharge = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        store.put_patient(patient).await.unwrap();

        predictive_occupancy_check(&deps).await.unwrap();
        assert_eq!(deps.alerts.active_count(), 0);
    }

    #[tokio::test]
    async fn test_discharge_sweep_starts_guarded_workflows() {
        let (deps, store) = deps();
        let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
        bed.transition(BedStatus::Occupied, Some(PatientId::new("P1")))
            .unwrap();
        store.put_bed(bed).await.unwrap();
        let mut patient = Patient::new(PatientId::new("P1"), UrgencyClass::Medium);
        patient.current_bed = Some(BedId::new("G-1"));
        patient.expected_discharge = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        store.put_patient(patient).await.unwrap();

        discharge_planning_sweep(&deps).await.unwrap();
        assert_eq!(deps.executor.active_count(), 1);

        // Second sweep is a no-op thanks to the duplicate guard
        discharge_planning_sweep(&deps).await.unwrap();
        assert_eq!(deps.executor.active_count(), 1);
    }

    #[tokio::test]
    async fn test_health_snapshot_appends_log() {
        let (deps, _store) = deps();
        health_snapshot(&deps).await.unwrap();
        // The entry landed in the operational log without error; the
        // snapshot itself carries the counters.
    }
}
