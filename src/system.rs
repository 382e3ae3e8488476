//! # System Assembly
//!
//! Wires the engine together: store, event bus, alert engine, workflow
//! executor, assignment queue, monitors, and the scheduler that drives
//! all of it. [`WardflowSystem`] is the embedding surface; everything
//! else stays reachable through its component handles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::alerts::{
    ActionReport, Alert, AlertEngine, AlertFilter, AlertId, BedAvailabilityMonitor,
    CapacityMonitor, CleaningOverdueMonitor, DischargeMonitor, MonitorContext, MonitorHarness,
    RemediationAction,
};
use crate::assignment::{AssignmentOutcome, AssignmentQueue, QueueMetrics, QueueStatus};
use crate::config::WardflowConfig;
use crate::constants::system::WARDFLOW_CORE_VERSION;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::models::{AssignmentRequest, Bed, BedId, Patient, PatientId, RequestToken};
use crate::scheduler::{default_jobs, JobDeps, Scheduler, SchedulerHealth};
use crate::scoring::BedMatchScore;
use crate::store::memory::MemoryStore;
use crate::store::ResourceStore;
use crate::workflow::{
    ActionRegistry, WorkflowExecutor, WorkflowId, WorkflowState, WorkflowStatus,
};

/// The assembled bed operations engine.
///
/// Construction wires every component; [`WardflowSystem::start`] spawns
/// the scheduler loop that keeps the engine autonomous. All components
/// stay usable without `start` for embedding and tests, driven by
/// explicit calls.
pub struct WardflowSystem {
    config: WardflowConfig,
    store: Arc<dyn ResourceStore>,
    publisher: Arc<EventPublisher>,
    alerts: Arc<AlertEngine>,
    executor: Arc<WorkflowExecutor>,
    queue: Arc<AssignmentQueue>,
    harness: Arc<MonitorHarness>,
    scheduler: Arc<Scheduler>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    scheduler_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WardflowSystem {
    /// Assemble the engine over an in-memory store.
    pub fn new(config: WardflowConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Assemble the engine over a caller-provided store.
    pub fn with_store(config: WardflowConfig, store: Arc<dyn ResourceStore>) -> Result<Self> {
        config.validate()?;

        let publisher = Arc::new(EventPublisher::default());
        let registry = Arc::new(ActionRegistry::builtin());
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        let alerts = Arc::new(AlertEngine::new(
            store.clone(),
            publisher.clone(),
            registry.clone(),
            config.alerts.clone(),
            config.scoring.clone(),
            trigger_tx,
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            publisher.clone(),
            registry,
            alerts.clone(),
            config.workflow.clone(),
            config.scoring.clone(),
            trigger_rx,
        ));
        let queue = Arc::new(AssignmentQueue::new(
            store.clone(),
            publisher.clone(),
            alerts.clone(),
            executor.clone(),
            config.scoring.clone(),
            config.queue.clone(),
        ));

        let harness = Arc::new(MonitorHarness::new(MonitorContext {
            store: store.clone(),
            alerts: alerts.clone(),
            config: config.alerts.clone(),
        }));
        harness.register(Arc::new(CapacityMonitor));
        harness.register(Arc::new(BedAvailabilityMonitor));
        harness.register(Arc::new(DischargeMonitor));
        harness.register(Arc::new(CleaningOverdueMonitor));

        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            alerts.clone(),
            publisher.clone(),
        ));
        for job in default_jobs(&JobDeps {
            store: store.clone(),
            queue: queue.clone(),
            executor: executor.clone(),
            alerts: alerts.clone(),
            harness: harness.clone(),
            config: config.clone(),
        }) {
            scheduler.add_job(job);
        }

        Ok(Self {
            config,
            store,
            publisher,
            alerts,
            executor,
            queue,
            harness,
            scheduler,
            shutdown_tx: Mutex::new(None),
            scheduler_task: Mutex::new(None),
        })
    }

    /// Spawn the scheduler loop. Idempotent; a second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *shutdown_slot = Some(tx);
        let scheduler = self.scheduler.clone();
        *self.scheduler_task.lock() = Some(tokio::spawn(scheduler.run(rx)));
        info!(version = WARDFLOW_CORE_VERSION, "🟢 Bed operations engine started");
    }

    /// Signal the scheduler loop to stop and wait for it to drain.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let task = self.scheduler_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("🔴 Bed operations engine stopped");
    }

    pub fn config(&self) -> &WardflowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    pub fn queue(&self) -> &Arc<AssignmentQueue> {
        &self.queue
    }

    pub fn monitors(&self) -> &Arc<MonitorHarness> {
        &self.harness
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // Provisioning

    pub async fn add_bed(&self, bed: Bed) -> Result<()> {
        Ok(self.store.put_bed(bed).await?)
    }

    pub async fn add_patient(&self, patient: Patient) -> Result<()> {
        Ok(self.store.put_patient(patient).await?)
    }

    // Assignment

    pub async fn submit_request(&self, request: AssignmentRequest) -> Result<RequestToken> {
        self.queue.submit(request).await
    }

    pub async fn process_next(&self) -> Result<AssignmentOutcome> {
        self.queue.process_next().await
    }

    pub async fn force_assign(
        &self,
        patient_id: &PatientId,
        bed_id: &BedId,
        reason: &str,
    ) -> Result<()> {
        self.queue.force_assign(patient_id, bed_id, reason).await
    }

    pub async fn recommendations(
        &self,
        patient_id: &PatientId,
        top_n: usize,
    ) -> Result<Vec<BedMatchScore>> {
        self.queue.recommendations(patient_id, top_n).await
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.queue_status()
    }

    pub fn queue_metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    // Workflows

    pub async fn start_workflow(&self, template: &str, params: serde_json::Value) -> Result<WorkflowId> {
        self.executor.create(template, params).await
    }

    pub async fn run_workflow(&self, id: WorkflowId) -> Result<WorkflowState> {
        self.executor.run_to_completion(id).await
    }

    pub async fn cancel_workflow(&self, id: WorkflowId) -> Result<()> {
        self.executor.cancel(id).await
    }

    pub fn workflow_status(&self, id: WorkflowId) -> Option<WorkflowStatus> {
        self.executor.status(id)
    }

    pub fn active_workflows(&self) -> Vec<WorkflowStatus> {
        self.executor.list_active()
    }

    // Alerts

    pub fn active_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts.list_active(filter)
    }

    pub async fn acknowledge_alert(&self, id: AlertId, actor: &str) -> Result<()> {
        self.alerts.acknowledge(id, actor).await
    }

    pub async fn resolve_alert(&self, id: AlertId, actor: &str, reason: &str) -> Result<()> {
        self.alerts.resolve(id, actor, reason).await
    }

    pub async fn execute_alert_action(
        &self,
        alert_id: AlertId,
        action_id: &str,
        actor: &str,
    ) -> Result<ActionReport> {
        self.alerts.execute_action(alert_id, action_id, actor).await
    }

    pub async fn approve_alert_action(
        &self,
        alert_id: AlertId,
        action_id: &str,
        actor: &str,
    ) -> Result<ActionReport> {
        self.alerts.approve_pending(alert_id, action_id, actor).await
    }

    pub fn pending_approvals(&self) -> Vec<(AlertId, RemediationAction)> {
        self.alerts.pending_approvals()
    }

    // Operations

    pub fn scheduler_health(&self) -> SchedulerHealth {
        self.scheduler.health()
    }

    pub async fn force_run_job(&self, id: &str) -> Result<()> {
        self.scheduler.force_run(id).await
    }

    pub fn re_enable_monitor(&self, name: &str) -> bool {
        self.harness.re_enable(name)
    }
}
