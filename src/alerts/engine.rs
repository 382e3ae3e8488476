//! # Alert Engine
//!
//! Deduplicated operational alerting. Alerts are identified by
//! `(alert_type, department, related_bed)`; repeated triggers merge into
//! the existing active alert instead of stacking duplicates. Remediation
//! actions attached to an alert dispatch through the action registry or
//! queue workflow triggers; gated actions wait for operator approval.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::alerts::types::{
    ActionReport, Alert, AlertDraft, AlertId, AlertPriority, AlertStatus, DedupKey,
    RemediationAction,
};
use crate::config::{AlertConfig, ScoringConfig};
use crate::constants::events;
use crate::error::{Result, WardflowError};
use crate::events::EventPublisher;
use crate::models::{BedStatus, Ward};
use crate::store::{BedFilter, ResourceStore};
use crate::workflow::templates::{self, EXPEDITED_CLEANING};
use crate::workflow::{cancel_pair, ActionContext, ActionRegistry, WorkflowTrigger};

/// Filter for [`AlertEngine::list_active`].
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub department: Option<Ward>,
    pub min_priority: Option<AlertPriority>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub auto_executed: usize,
}

pub struct AlertEngine {
    store: Arc<dyn ResourceStore>,
    publisher: Arc<EventPublisher>,
    registry: Arc<ActionRegistry>,
    config: AlertConfig,
    scoring: ScoringConfig,
    active: DashMap<DedupKey, Alert>,
    index: DashMap<AlertId, DedupKey>,
    audit: RwLock<Vec<Alert>>,
    trigger_tx: mpsc::UnboundedSender<WorkflowTrigger>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        publisher: Arc<EventPublisher>,
        registry: Arc<ActionRegistry>,
        config: AlertConfig,
        scoring: ScoringConfig,
        trigger_tx: mpsc::UnboundedSender<WorkflowTrigger>,
    ) -> Self {
        Self {
            store,
            publisher,
            registry,
            config,
            scoring,
            active: DashMap::new(),
            index: DashMap::new(),
            audit: RwLock::new(Vec::new()),
            trigger_tx,
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Create a new alert or merge into the active alert with the same
    /// dedup key. Merging is atomic per key: an incoming trigger at or
    /// above the existing priority overwrites message and metadata
    /// (last-write-wins per field) and bumps `updated_at`; a lower
    /// priority trigger is silently absorbed.
    pub async fn create(&self, draft: AlertDraft) -> Result<AlertId> {
        let key = draft.dedup_key();
        let mut created = false;
        let mut merged = false;

        let (id, alert_type, priority, title) = match self.active.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if draft.priority >= existing.priority {
                    existing.priority = draft.priority;
                    existing.message = draft.message.clone();
                    for (k, v) in &draft.metadata {
                        existing.metadata.insert(k.clone(), v.clone());
                    }
                    for action in &draft.actions {
                        if !existing.actions.iter().any(|a| a.id == action.id) {
                            existing.actions.push(action.clone());
                        }
                    }
                    if let Some(ttl) = draft.ttl {
                        existing.expires_at = Some(Utc::now() + ttl);
                    }
                    existing.updated_at = Utc::now();
                    merged = true;
                }
                (
                    existing.id,
                    existing.alert_type,
                    existing.priority,
                    existing.title.clone(),
                )
            }
            Entry::Vacant(slot) => {
                let alert = draft.into_alert();
                let summary = (alert.id, alert.alert_type, alert.priority, alert.title.clone());
                self.index.insert(alert.id, key);
                created = true;
                slot.insert(alert);
                summary
            }
        };

        if created {
            warn!(
                alert_id = %id,
                alert_type = %alert_type,
                priority = %priority,
                title = %title,
                "🚨 Alert created"
            );
            self.publisher
                .publish(
                    events::ALERT_CREATED,
                    json!({
                        "alert_id": id.to_string(),
                        "alert_type": alert_type.to_string(),
                        "priority": priority.to_string(),
                    }),
                )
                .await
                .ok();
        } else if merged {
            debug!(alert_id = %id, alert_type = %alert_type, "Alert trigger merged");
            self.publisher
                .publish(
                    events::ALERT_UPDATED,
                    json!({"alert_id": id.to_string(), "alert_type": alert_type.to_string()}),
                )
                .await
                .ok();
        }
        Ok(id)
    }

    pub async fn acknowledge(&self, id: AlertId, actor: &str) -> Result<()> {
        let key = self
            .index
            .get(&id)
            .map(|k| k.clone())
            .ok_or_else(|| WardflowError::Alert(format!("alert {id} is not active")))?;
        {
            let mut alert = self
                .active
                .get_mut(&key)
                .ok_or_else(|| WardflowError::Alert(format!("alert {id} is not active")))?;
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_by = Some(actor.to_string());
            alert.updated_at = Utc::now();
        }
        self.publisher
            .publish(
                events::ALERT_ACKNOWLEDGED,
                json!({"alert_id": id.to_string(), "actor": actor}),
            )
            .await
            .ok();
        Ok(())
    }

    /// Resolve an alert: removed from the active set and appended to the
    /// audit trail, freeing its dedup key for future triggers.
    pub async fn resolve(&self, id: AlertId, actor: &str, reason: &str) -> Result<()> {
        let (_, key) = self
            .index
            .remove(&id)
            .ok_or_else(|| WardflowError::Alert(format!("alert {id} is not active")))?;
        let (_, mut alert) = self
            .active
            .remove(&key)
            .ok_or_else(|| WardflowError::Alert(format!("alert {id} is not active")))?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_by = Some(actor.to_string());
        alert.resolution_reason = Some(reason.to_string());
        alert.updated_at = Utc::now();
        let alert_type = alert.alert_type;
        self.audit.write().push(alert);

        info!(alert_id = %id, alert_type = %alert_type, actor, reason, "✅ Alert resolved");
        self.publisher
            .publish(
                events::ALERT_RESOLVED,
                json!({"alert_id": id.to_string(), "actor": actor, "reason": reason}),
            )
            .await
            .ok();
        Ok(())
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        if let Some(key) = self.index.get(&id) {
            return self.active.get(&key).map(|a| a.clone());
        }
        self.audit.read().iter().find(|a| a.id == id).cloned()
    }

    /// Active alerts matching the filter, most severe first, ties by age.
    pub fn list_active(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .active
            .iter()
            .filter(|entry| {
                filter
                    .department
                    .as_ref()
                    .map_or(true, |d| entry.department.as_ref() == Some(d))
                    && filter.min_priority.map_or(true, |p| entry.priority >= p)
            })
            .map(|entry| entry.clone())
            .collect();
        alerts.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        alerts
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Operator-facing execution of a remediation action. Gated actions
    /// must go through [`AlertEngine::approve_pending`].
    pub async fn execute_action(
        &self,
        alert_id: AlertId,
        action_id: &str,
        actor: &str,
    ) -> Result<ActionReport> {
        self.dispatch(alert_id, action_id, actor, false).await
    }

    /// Approve and run an approval-gated action.
    pub async fn approve_pending(
        &self,
        alert_id: AlertId,
        action_id: &str,
        actor: &str,
    ) -> Result<ActionReport> {
        self.dispatch(alert_id, action_id, actor, true).await
    }

    /// Withdraw a pending action from an alert without running it.
    pub async fn cancel_pending(
        &self,
        alert_id: AlertId,
        action_id: &str,
        actor: &str,
    ) -> Result<()> {
        let key = self
            .index
            .get(&alert_id)
            .map(|k| k.clone())
            .ok_or_else(|| WardflowError::Alert(format!("alert {alert_id} is not active")))?;
        {
            let mut alert = self
                .active
                .get_mut(&key)
                .ok_or_else(|| WardflowError::Alert(format!("alert {alert_id} is not active")))?;
            let before = alert.actions.len();
            alert.actions.retain(|a| a.id != action_id);
            if alert.actions.len() == before {
                return Err(WardflowError::Alert(format!(
                    "alert {alert_id} has no action {action_id}"
                )));
            }
            alert.updated_at = Utc::now();
        }
        info!(alert_id = %alert_id, action_id, actor, "Pending action cancelled");
        Ok(())
    }

    /// Alerts carrying at least one approval-gated, not-yet-executed action.
    pub fn pending_approvals(&self) -> Vec<(AlertId, RemediationAction)> {
        self.active
            .iter()
            .flat_map(|entry| {
                entry
                    .actions
                    .iter()
                    .filter(|a| a.requires_approval && !entry.executed_actions.contains(&a.id))
                    .map(|a| (entry.id, a.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    async fn dispatch(
        &self,
        alert_id: AlertId,
        action_id: &str,
        actor: &str,
        approved: bool,
    ) -> Result<ActionReport> {
        let alert = self
            .get(alert_id)
            .filter(|a| a.status != AlertStatus::Resolved)
            .ok_or_else(|| WardflowError::Alert(format!("alert {alert_id} is not active")))?;
        let action = alert
            .actions
            .iter()
            .find(|a| a.id == action_id)
            .cloned()
            .ok_or_else(|| {
                WardflowError::Alert(format!("alert {alert_id} has no action {action_id}"))
            })?;
        if action.requires_approval && !approved {
            return Err(WardflowError::Alert(format!(
                "action {action_id} requires approval"
            )));
        }

        self.mark_status(alert_id, AlertStatus::InProgress);
        let summary = match self.run_remediation(&alert, &action).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(alert_id = %alert_id, action_id, error = %e, "🔴 Remediation action failed");
                return Err(e);
            }
        };
        self.mark_executed(alert_id, action_id);

        info!(alert_id = %alert_id, action_id, actor, summary = %summary, "⚡ Remediation executed");
        self.publisher
            .publish(
                events::ALERT_ACTION_EXECUTED,
                json!({
                    "alert_id": alert_id.to_string(),
                    "action_id": action_id,
                    "actor": actor,
                }),
            )
            .await
            .ok();

        Ok(ActionReport {
            alert_id,
            action_id: action_id.to_string(),
            executed_by: actor.to_string(),
            summary,
            executed_at: Utc::now(),
        })
    }

    async fn run_remediation(
        &self,
        alert: &Alert,
        action: &RemediationAction,
    ) -> Result<String> {
        // Workflow-spawning remediations queue a trigger for the executor
        // sweep instead of calling into the executor directly.
        if let Some(template) = action.params.get("trigger_template").and_then(Value::as_str) {
            let mut params = self.alert_params(alert, &action.params);
            if let Some(map) = params.as_object_mut() {
                // Only the subject keys the template actually accepts
                let allowed = templates::allowed_params(template);
                map.retain(|k, _| allowed.contains(&k.as_str()));
            }
            self.trigger_tx
                .send(WorkflowTrigger::new(template, params))
                .map_err(|_| WardflowError::Alert("workflow trigger channel closed".to_string()))?;
            return Ok(format!("queued {template} workflow trigger"));
        }

        if let Some(ward) = action
            .params
            .get("expedite_ward_cleaning")
            .and_then(Value::as_str)
        {
            let limit = action
                .params
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(2) as usize;
            let mut filter = BedFilter::with_status(BedStatus::Cleaning);
            filter.ward = Some(Ward::new(ward));
            let beds = self.store.query_beds(&filter).await?;
            let count = beds.len().min(limit);
            for bed in beds.into_iter().take(limit) {
                self.trigger_tx
                    .send(WorkflowTrigger::new(
                        EXPEDITED_CLEANING,
                        json!({"bed_id": bed.id.as_str()}),
                    ))
                    .map_err(|_| {
                        WardflowError::Alert("workflow trigger channel closed".to_string())
                    })?;
            }
            return Ok(format!("expedited cleaning for {count} beds in {ward}"));
        }

        let registered = self.registry.get(action.kind).ok_or_else(|| {
            WardflowError::Alert(format!("no registered action for kind {}", action.kind))
        })?;
        let (_handle, cancel) = cancel_pair();
        let ctx = ActionContext {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            scoring: self.scoring.clone(),
            scratch: Arc::new(Mutex::new(serde_json::Map::new())),
            workflow_params: self.alert_params(alert, &action.params),
            cancel,
        };
        let outcome = registered
            .execute(&ctx, &action.params)
            .await
            .map_err(|e| WardflowError::Alert(e.to_string()))?;
        Ok(outcome.summary)
    }

    /// Params a remediation runs with: the action's own params overlaid
    /// on the alert's subject references.
    fn alert_params(&self, alert: &Alert, action_params: &Value) -> Value {
        let mut params = serde_json::Map::new();
        if let Some(bed) = &alert.related_bed {
            params.insert("bed_id".to_string(), json!(bed.as_str()));
        }
        if let Some(patient) = &alert.related_patient {
            params.insert("patient_id".to_string(), json!(patient.as_str()));
        }
        if let Some(ward) = &alert.department {
            params.insert("ward".to_string(), json!(ward.as_str()));
        }
        if let Some(extra) = action_params.as_object() {
            for (k, v) in extra {
                if k != "trigger_template" && k != "expedite_ward_cleaning" && k != "limit" {
                    params.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(params)
    }

    fn mark_status(&self, id: AlertId, status: AlertStatus) {
        if let Some(key) = self.index.get(&id) {
            if let Some(mut alert) = self.active.get_mut(&key) {
                alert.status = status;
                alert.updated_at = Utc::now();
            }
        }
    }

    fn mark_executed(&self, id: AlertId, action_id: &str) {
        if let Some(key) = self.index.get(&id) {
            if let Some(mut alert) = self.active.get_mut(&key) {
                if !alert.executed_actions.contains(&action_id.to_string()) {
                    alert.executed_actions.push(action_id.to_string());
                }
                alert.updated_at = Utc::now();
            }
        }
    }

    /// Periodic maintenance: auto-resolve expired alerts, then run every
    /// auto-executable ungated action that has not run yet. One failing
    /// action never stops the sweep.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let expired: Vec<AlertId> = self
            .active
            .iter()
            .filter(|a| a.is_expired(now))
            .map(|a| a.id)
            .collect();
        for id in expired {
            if self.resolve(id, "system", "expired").await.is_ok() {
                stats.expired += 1;
            }
        }

        let due: Vec<(AlertId, String)> = self
            .active
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .flat_map(|a| {
                a.actions
                    .iter()
                    .filter(|act| {
                        act.auto_executable
                            && !act.requires_approval
                            && !a.executed_actions.contains(&act.id)
                    })
                    .map(|act| (a.id, act.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (alert_id, action_id) in due {
            match self.dispatch(alert_id, &action_id, "system", false).await {
                Ok(_) => stats.auto_executed += 1,
                Err(e) => {
                    warn!(alert_id = %alert_id, action_id = %action_id, error = %e,
                        "Auto-executable action failed, leaving alert active");
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::types::AlertType;
    use crate::store::memory::MemoryStore;

    fn engine() -> (AlertEngine, mpsc::UnboundedReceiver<WorkflowTrigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = AlertEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EventPublisher::default()),
            Arc::new(ActionRegistry::builtin()),
            AlertConfig::default(),
            ScoringConfig::default(),
            tx,
        );
        (engine, rx)
    }

    fn draft(priority: AlertPriority, message: &str) -> AlertDraft {
        AlertDraft::new(AlertType::NoBedsAvailable, priority, "No beds", message)
            .department(Ward::new("ICU"))
    }

    #[tokio::test]
    async fn test_same_key_triggers_collapse() {
        let (engine, _rx) = engine();
        let first = engine
            .create(draft(AlertPriority::Critical, "first"))
            .await
            .unwrap();
        for i in 0..5 {
            let id = engine
                .create(draft(AlertPriority::Critical, &format!("trigger {i}")))
                .await
                .unwrap();
            assert_eq!(id, first);
        }
        assert_eq!(engine.active_count(), 1);
        // Last-write-wins on the message
        assert_eq!(engine.get(first).unwrap().message, "trigger 4");
    }

    #[tokio::test]
    async fn test_lower_priority_trigger_silently_absorbed() {
        let (engine, _rx) = engine();
        let id = engine
            .create(draft(AlertPriority::Critical, "critical state"))
            .await
            .unwrap();
        engine
            .create(draft(AlertPriority::Low, "minor update"))
            .await
            .unwrap();
        let alert = engine.get(id).unwrap();
        assert_eq!(alert.priority, AlertPriority::Critical);
        assert_eq!(alert.message, "critical state");
    }

    #[tokio::test]
    async fn test_resolve_frees_dedup_key() {
        let (engine, _rx) = engine();
        let first = engine
            .create(draft(AlertPriority::High, "first"))
            .await
            .unwrap();
        engine.resolve(first, "operator", "fixed").await.unwrap();
        assert_eq!(engine.active_count(), 0);
        assert_eq!(
            engine.get(first).unwrap().status,
            AlertStatus::Resolved
        );

        let second = engine
            .create(draft(AlertPriority::High, "again"))
            .await
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_expiry_sweep_resolves() {
        let (engine, _rx) = engine();
        let id = engine
            .create(
                draft(AlertPriority::Medium, "short lived")
                    .expires_in(chrono::Duration::seconds(-1)),
            )
            .await
            .unwrap();
        let stats = engine.sweep().await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(engine.active_count(), 0);
        assert_eq!(
            engine.get(id).unwrap().resolution_reason.as_deref(),
            Some("expired")
        );
    }

    #[tokio::test]
    async fn test_auto_exec_sweep_queues_workflow_trigger() {
        let (engine, mut rx) = engine();
        engine
            .create(
                AlertDraft::new(
                    AlertType::CleaningOverdue,
                    AlertPriority::High,
                    "Cleaning overdue",
                    "bed stuck in cleaning",
                )
                .related_bed(crate::models::BedId::new("G-1"))
                .action(
                    RemediationAction::new("expedite", "Expedite cleaning", crate::workflow::ActionKind::NotifyHousekeeping)
                        .auto()
                        .with_params(json!({"trigger_template": "expedited_cleaning"})),
                ),
            )
            .await
            .unwrap();

        let stats = engine.sweep().await.unwrap();
        assert_eq!(stats.auto_executed, 1);
        let trigger = rx.try_recv().unwrap();
        assert_eq!(trigger.template, "expedited_cleaning");
        assert_eq!(trigger.params["bed_id"], json!("G-1"));

        // Second sweep does not re-run the executed action
        let stats = engine.sweep().await.unwrap();
        assert_eq!(stats.auto_executed, 0);
    }

    #[tokio::test]
    async fn test_gated_action_waits_for_approval() {
        let (engine, mut rx) = engine();
        let id = engine
            .create(
                draft(AlertPriority::Critical, "capacity").action(
                    RemediationAction::new("expedite", "Expedite", crate::workflow::ActionKind::NotifyHousekeeping)
                        .auto()
                        .gated()
                        .with_params(json!({"expedite_ward_cleaning": "ICU"})),
                ),
            )
            .await
            .unwrap();

        engine.sweep().await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(engine.execute_action(id, "expedite", "operator").await.is_err());
        assert_eq!(engine.pending_approvals().len(), 1);

        engine.approve_pending(id, "expedite", "operator").await.unwrap();
        assert!(engine.pending_approvals().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_tracks_actor() {
        let (engine, _rx) = engine();
        let id = engine
            .create(draft(AlertPriority::High, "hello"))
            .await
            .unwrap();
        engine.acknowledge(id, "charge_nurse").await.unwrap();
        let alert = engine.get(id).unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("charge_nurse"));
    }

    #[tokio::test]
    async fn test_list_active_sorted_by_severity() {
        let (engine, _rx) = engine();
        engine
            .create(
                AlertDraft::new(AlertType::CapacityHigh, AlertPriority::High, "High", "x")
                    .department(Ward::new("ICU")),
            )
            .await
            .unwrap();
        engine
            .create(
                AlertDraft::new(AlertType::CapacityCritical, AlertPriority::Critical, "Crit", "y")
                    .department(Ward::new("Surgery")),
            )
            .await
            .unwrap();

        let all = engine.list_active(&AlertFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].priority, AlertPriority::Critical);

        let icu_only = engine.list_active(&AlertFilter {
            department: Some(Ward::new("ICU")),
            min_priority: None,
        });
        assert_eq!(icu_only.len(), 1);
    }
}
