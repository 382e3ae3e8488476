//! # Workflow Executor
//!
//! Owns every live workflow, advances them scan by scan, and reaps the
//! finished ones. A scan collects all ready steps (dependencies
//! complete), runs them concurrently under per-step timeouts, and
//! records the results; failed steps retry in place until their retry
//! budget is spent, at which point the whole workflow fails. Locks are
//! never held across an await.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDraft, AlertEngine, AlertPriority, AlertType};
use crate::config::{ScoringConfig, WorkflowConfig};
use crate::constants::events;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::models::{BedId, BedStatus, Priority};
use crate::store::{BedFilter, ResourceStore};
use crate::workflow::actions::{ActionContext, ActionRegistry};
use crate::workflow::states::{StepState, WorkflowState};
use crate::workflow::templates::{self, BED_TURNOVER};
use crate::workflow::types::{StepSpec, Workflow, WorkflowId, WorkflowStatus};
use crate::workflow::{cancel_pair, WorkflowError};

/// Request to create a workflow, queued by components that must not call
/// the executor directly. Drained by the periodic sweep.
#[derive(Debug, Clone)]
pub struct WorkflowTrigger {
    pub template: String,
    pub params: Value,
}

impl WorkflowTrigger {
    pub fn new(template: impl Into<String>, params: Value) -> Self {
        Self {
            template: template.into(),
            params,
        }
    }

    /// The bed or patient this trigger is about, used by the
    /// duplicate-trigger guard.
    pub fn subject(&self) -> Option<String> {
        subject_of(&self.params)
    }
}

fn subject_of(params: &Value) -> Option<String> {
    params
        .get("bed_id")
        .or_else(|| params.get("patient_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub triggers_created: usize,
    pub ticked: usize,
    pub collected: usize,
}

enum Planned {
    Terminal(WorkflowState),
    Finished {
        state: WorkflowState,
        reason: Option<String>,
    },
    Run(Vec<(usize, StepSpec)>),
}

pub struct WorkflowExecutor {
    store: Arc<dyn ResourceStore>,
    publisher: Arc<EventPublisher>,
    registry: Arc<ActionRegistry>,
    alerts: Arc<AlertEngine>,
    config: WorkflowConfig,
    scoring: ScoringConfig,
    workflows: DashMap<WorkflowId, Arc<Mutex<Workflow>>>,
    trigger_rx: Mutex<mpsc::UnboundedReceiver<WorkflowTrigger>>,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        publisher: Arc<EventPublisher>,
        registry: Arc<ActionRegistry>,
        alerts: Arc<AlertEngine>,
        config: WorkflowConfig,
        scoring: ScoringConfig,
        trigger_rx: mpsc::UnboundedReceiver<WorkflowTrigger>,
    ) -> Self {
        Self {
            store,
            publisher,
            registry,
            alerts,
            config,
            scoring,
            workflows: DashMap::new(),
            trigger_rx: Mutex::new(trigger_rx),
        }
    }

    /// Instantiate a named template. The step graph is validated before
    /// the workflow is admitted; a cyclic or dangling graph never runs.
    pub async fn create(&self, template: &str, params: Value) -> Result<WorkflowId> {
        let (specs, priority) = templates::instantiate(template, &params, &self.config)
            .map_err(crate::error::WardflowError::from)?;
        self.admit(template, specs, priority, params).await
    }

    /// Admit a caller-built step graph under the same validation.
    pub async fn create_custom(
        &self,
        name: &str,
        specs: Vec<StepSpec>,
        priority: Priority,
        params: Value,
    ) -> Result<WorkflowId> {
        self.admit(name, specs, priority, params).await
    }

    async fn admit(
        &self,
        template: &str,
        specs: Vec<StepSpec>,
        priority: Priority,
        params: Value,
    ) -> Result<WorkflowId> {
        let workflow = Workflow::new(template, priority, specs, params)
            .map_err(crate::error::WardflowError::from)?;
        let id = workflow.id;
        self.workflows.insert(id, Arc::new(Mutex::new(workflow)));

        info!(workflow_id = %id, template, priority = %priority, "🚀 Workflow created");
        self.publisher
            .publish(
                events::WORKFLOW_CREATED,
                json!({"workflow_id": id.to_string(), "template": template}),
            )
            .await
            .ok();
        Ok(id)
    }

    /// Create unless a non-terminal workflow for the same template and
    /// subject already exists. Returns `None` when guarded.
    pub async fn create_guarded(
        &self,
        template: &str,
        params: Value,
    ) -> Result<Option<WorkflowId>> {
        if let Some(subject) = subject_of(&params) {
            if self.has_active_for(template, &subject) {
                debug!(template, subject, "Duplicate workflow trigger suppressed");
                return Ok(None);
            }
        }
        self.create(template, params).await.map(Some)
    }

    fn has_active_for(&self, template: &str, subject: &str) -> bool {
        self.workflows.iter().any(|entry| {
            let wf = entry.lock();
            !wf.state.is_terminal()
                && wf.template == template
                && subject_of(&wf.params).as_deref() == Some(subject)
        })
    }

    /// Advance one workflow by a single scan and return its state.
    pub async fn tick(&self, id: WorkflowId) -> Result<WorkflowState> {
        let entry = self
            .workflows
            .get(&id)
            .map(|e| e.clone())
            .ok_or(WorkflowError::NotFound(id))?;

        let planned = {
            let mut wf = entry.lock();
            if wf.state.is_terminal() {
                Planned::Terminal(wf.state)
            } else {
                if wf.state == WorkflowState::Pending {
                    wf.state = WorkflowState::Running;
                    wf.started_at = Some(Utc::now());
                }
                let ready = wf.ready_steps();
                if ready.is_empty() {
                    if wf.all_steps_complete() {
                        wf.state = WorkflowState::Complete;
                        wf.completed_at = Some(Utc::now());
                        Planned::Finished {
                            state: wf.state,
                            reason: None,
                        }
                    } else {
                        // Work remains but nothing can run: stuck.
                        let reason = "no runnable steps remain".to_string();
                        wf.state = WorkflowState::Failed;
                        wf.completed_at = Some(Utc::now());
                        wf.failure_reason = Some(reason.clone());
                        Planned::Finished {
                            state: wf.state,
                            reason: Some(reason),
                        }
                    }
                } else {
                    let mut batch = Vec::with_capacity(ready.len());
                    for index in ready {
                        let step = &mut wf.steps[index];
                        step.state = StepState::Running;
                        step.attempts += 1;
                        step.started_at = Some(Utc::now());
                        batch.push((index, step.spec.clone()));
                    }
                    Planned::Run(batch)
                }
            }
        };

        match planned {
            Planned::Terminal(state) => Ok(state),
            Planned::Finished { state, reason } => {
                self.finalize(id, &entry, state, reason).await;
                Ok(state)
            }
            Planned::Run(batch) => {
                let results = self.run_batch(&entry, batch).await;
                let state = self.record_results(id, &entry, results).await;
                Ok(state)
            }
        }
    }

    async fn run_batch(
        &self,
        entry: &Arc<Mutex<Workflow>>,
        batch: Vec<(usize, StepSpec)>,
    ) -> Vec<(usize, std::result::Result<Value, String>)> {
        let (scratch, workflow_params) = {
            let wf = entry.lock();
            (wf.scratch.clone(), wf.params.clone())
        };

        let futures = batch.into_iter().map(|(index, spec)| {
            let store = self.store.clone();
            let publisher = self.publisher.clone();
            let registry = self.registry.clone();
            let scoring = self.scoring.clone();
            let scratch = scratch.clone();
            let workflow_params = workflow_params.clone();
            async move {
                let (handle, cancel) = cancel_pair();
                let ctx = ActionContext {
                    store,
                    publisher,
                    scoring,
                    scratch,
                    workflow_params,
                    cancel,
                };
                let result = match registry.get(spec.action) {
                    None => Err(format!("no action registered for kind {}", spec.action)),
                    Some(action) => {
                        match tokio::time::timeout(spec.timeout, action.execute(&ctx, &spec.params))
                            .await
                        {
                            Ok(Ok(outcome)) => Ok(outcome.data),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(_) => {
                                // Best-effort cancel; any late side effects
                                // are lost updates for the monitor sweeps.
                                handle.cancel();
                                Err(format!("timed out after {:?}", spec.timeout))
                            }
                        }
                    }
                };
                (index, result)
            }
        });
        join_all(futures).await
    }

    async fn record_results(
        &self,
        id: WorkflowId,
        entry: &Arc<Mutex<Workflow>>,
        results: Vec<(usize, std::result::Result<Value, String>)>,
    ) -> WorkflowState {
        let mut step_events: Vec<(String, Value)> = Vec::new();
        let mut failure: Option<(String, u32, String)> = None;

        let state = {
            let mut wf = entry.lock();
            if wf.state.is_terminal() {
                // Cancelled mid-flight; results are discarded.
                return wf.state;
            }
            for (index, result) in results {
                let step = &mut wf.steps[index];
                match result {
                    Ok(data) => {
                        step.state = StepState::Complete;
                        step.completed_at = Some(Utc::now());
                        step.output = Some(data);
                        step_events.push((
                            events::WORKFLOW_STEP_COMPLETED.to_string(),
                            json!({
                                "workflow_id": id.to_string(),
                                "step": step.spec.id,
                                "attempts": step.attempts,
                            }),
                        ));
                    }
                    Err(message) => {
                        step.last_error = Some(message.clone());
                        step_events.push((
                            events::WORKFLOW_STEP_FAILED.to_string(),
                            json!({
                                "workflow_id": id.to_string(),
                                "step": step.spec.id,
                                "attempts": step.attempts,
                                "error": message,
                            }),
                        ));
                        if step.attempts <= step.spec.max_retries {
                            // Retry in place on the next scan.
                            step.state = StepState::Pending;
                        } else {
                            step.state = StepState::Failed;
                            step.completed_at = Some(Utc::now());
                            failure = Some((step.spec.id.clone(), step.attempts, message));
                        }
                    }
                }
            }
            if let Some((step_id, _, message)) = &failure {
                wf.state = WorkflowState::Failed;
                wf.completed_at = Some(Utc::now());
                wf.failure_reason = Some(format!("step {step_id} failed: {message}"));
            } else if wf.all_steps_complete() {
                wf.state = WorkflowState::Complete;
                wf.completed_at = Some(Utc::now());
            }
            wf.state
        };

        for (name, context) in step_events {
            self.publisher.publish(name, context).await.ok();
        }
        if state.is_terminal() {
            let reason = failure.map(|(step, attempts, message)| {
                format!("step {step} failed after {attempts} attempts: {message}")
            });
            self.finalize(id, entry, state, reason).await;
        }
        state
    }

    async fn finalize(
        &self,
        id: WorkflowId,
        entry: &Arc<Mutex<Workflow>>,
        state: WorkflowState,
        reason: Option<String>,
    ) {
        let (template, params, failed_step, attempts) = {
            let wf = entry.lock();
            let failed = wf
                .steps
                .iter()
                .find(|s| s.state == StepState::Failed)
                .map(|s| (s.spec.id.clone(), s.attempts));
            (
                wf.template.clone(),
                wf.params.clone(),
                failed.as_ref().map(|(id, _)| id.clone()),
                failed.map(|(_, a)| a).unwrap_or(0),
            )
        };

        let succeeded = state == WorkflowState::Complete;
        if succeeded {
            info!(workflow_id = %id, template = %template, "✅ Workflow completed");
        } else {
            warn!(
                workflow_id = %id,
                template = %template,
                state = %state,
                reason = reason.as_deref().unwrap_or("unspecified"),
                "🔴 Workflow did not complete"
            );
        }
        self.publisher
            .publish_workflow_finished(id, &template, succeeded)
            .await
            .ok();

        if state == WorkflowState::Failed {
            let message = reason.unwrap_or_else(|| "workflow failed".to_string());
            let mut draft = AlertDraft::new(
                AlertType::WorkflowFailed,
                AlertPriority::High,
                format!("Workflow {template} failed"),
                message.clone(),
            )
            .meta("workflow_id", json!(id.to_string()))
            .meta("template", json!(template))
            .meta("attempts", json!(attempts))
            .meta("last_error", json!(message));
            if let Some(step) = failed_step {
                draft = draft.meta("step", json!(step));
            }
            if let Some(bed) = params.get("bed_id").and_then(Value::as_str) {
                draft = draft.related_bed(BedId::new(bed));
            }
            self.alerts.create(draft).await.ok();
        }
    }

    /// Drive one workflow to a terminal state.
    pub async fn run_to_completion(&self, id: WorkflowId) -> Result<WorkflowState> {
        loop {
            let state = self.tick(id).await?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }

    /// Cancel a non-terminal workflow. In-flight step results for a
    /// cancelled workflow are discarded.
    pub async fn cancel(&self, id: WorkflowId) -> Result<()> {
        let entry = self
            .workflows
            .get(&id)
            .map(|e| e.clone())
            .ok_or(WorkflowError::NotFound(id))?;
        let template = {
            let mut wf = entry.lock();
            if wf.state.is_terminal() {
                return Err(WorkflowError::AlreadyTerminal(id).into());
            }
            wf.state = WorkflowState::Cancelled;
            wf.completed_at = Some(Utc::now());
            wf.template.clone()
        };
        info!(workflow_id = %id, template = %template, "Workflow cancelled");
        self.publisher
            .publish_workflow_finished(id, &template, false)
            .await
            .ok();
        Ok(())
    }

    pub fn status(&self, id: WorkflowId) -> Option<WorkflowStatus> {
        self.workflows.get(&id).map(|entry| {
            let wf = entry.lock();
            WorkflowStatus::from(&*wf)
        })
    }

    pub fn list_active(&self) -> Vec<WorkflowStatus> {
        self.workflows
            .iter()
            .filter_map(|entry| {
                let wf = entry.lock();
                if wf.state.is_terminal() {
                    None
                } else {
                    Some(WorkflowStatus::from(&*wf))
                }
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.list_active().len()
    }

    /// Periodic maintenance pass: drain queued triggers, start turnover
    /// workflows for beds stuck in cleaning, advance every live
    /// workflow one scan, and collect expired terminal ones.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let drained: Vec<WorkflowTrigger> = {
            let mut rx = self.trigger_rx.lock();
            let mut drained = Vec::new();
            while let Ok(trigger) = rx.try_recv() {
                drained.push(trigger);
            }
            drained
        };
        for trigger in drained {
            match self
                .create_guarded(&trigger.template, trigger.params.clone())
                .await
            {
                Ok(Some(_)) => report.triggers_created += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(template = %trigger.template, error = %e, "Workflow trigger rejected");
                }
            }
        }

        // Beds parked in cleaning with no turnover workflow get one.
        let threshold =
            Utc::now() - ChronoDuration::seconds(self.config.cleaning_trigger_after_secs as i64);
        let stale = self
            .store
            .query_beds(&BedFilter::with_status(BedStatus::Cleaning))
            .await?;
        for bed in stale.into_iter().filter(|b| b.last_status_change <= threshold) {
            if let Some(_id) = self
                .create_guarded(BED_TURNOVER, json!({"bed_id": bed.id.as_str()}))
                .await?
            {
                report.triggers_created += 1;
            }
        }

        let live: Vec<WorkflowId> = self
            .workflows
            .iter()
            .filter(|entry| !entry.lock().state.is_terminal())
            .map(|entry| *entry.key())
            .collect();
        for id in live {
            if self.tick(id).await.is_ok() {
                report.ticked += 1;
            }
        }

        let retention = ChronoDuration::seconds(self.config.retention_secs as i64);
        let cutoff = Utc::now() - retention;
        let expired: Vec<WorkflowId> = self
            .workflows
            .iter()
            .filter(|entry| {
                let wf = entry.lock();
                wf.state.is_terminal() && wf.completed_at.map_or(false, |t| t <= cutoff)
            })
            .map(|entry| *entry.key())
            .collect();
        for id in expired {
            self.workflows.remove(&id);
            report.collected += 1;
        }
        if report.collected > 0 {
            debug!(collected = report.collected, "Workflow garbage collection");
        }

        Ok(report)
    }
}
