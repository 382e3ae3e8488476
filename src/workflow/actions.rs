//! # Workflow Actions
//!
//! Tagged action dispatch: every step names an [`ActionKind`], resolved
//! through the [`ActionRegistry`] built once at process start. Actions
//! receive a context with the store, the event publisher, the workflow
//! scratch map, and a cooperative cancel token they must poll around
//! long waits.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ScoringConfig;
use crate::constants::events;
use crate::events::EventPublisher;
use crate::models::{BedId, BedStatus, OccupancyRecord, PatientId};
use crate::scoring;
use crate::store::{BedFilter, ResourceStore, StoreError};
use crate::workflow::types::Scratch;
use crate::workflow::CancelToken;

/// Enumerated kinds of work a step can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FindBed,
    ReserveBed,
    NotifyStaff,
    PersistAssignment,
    NotifyHousekeeping,
    TrackCleaning,
    QualityCheck,
    MarkBedAvailable,
    BeginDischarge,
    ReleaseBed,
    NotifyAdmissions,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FindBed => "find_bed",
            Self::ReserveBed => "reserve_bed",
            Self::NotifyStaff => "notify_staff",
            Self::PersistAssignment => "persist_assignment",
            Self::NotifyHousekeeping => "notify_housekeeping",
            Self::TrackCleaning => "track_cleaning",
            Self::QualityCheck => "quality_check",
            Self::MarkBedAvailable => "mark_bed_available",
            Self::BeginDischarge => "begin_discharge",
            Self::ReleaseBed => "release_bed",
            Self::NotifyAdmissions => "notify_admissions",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action failed: {0}")]
    Failed(String),

    #[error("Missing parameter: {0}")]
    MissingParam(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Action cancelled")]
    Cancelled,
}

/// Result of a successful action execution.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub summary: String,
    pub data: Value,
}

impl ActionOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Everything an action may touch. Cloned per step execution.
#[derive(Clone)]
pub struct ActionContext {
    pub store: Arc<dyn ResourceStore>,
    pub publisher: Arc<EventPublisher>,
    pub scoring: ScoringConfig,
    /// Workflow-scoped scratch map for passing values between steps.
    pub scratch: Scratch,
    /// Workflow-level params, merged behind the step's own params.
    pub workflow_params: Value,
    pub cancel: CancelToken,
}

impl ActionContext {
    /// Resolve a string parameter: step params first, then workflow
    /// params, then the scratch map (outputs of earlier steps).
    pub fn param_str(&self, step_params: &Value, key: &str) -> Result<String, ActionError> {
        if let Some(v) = step_params.get(key).and_then(Value::as_str) {
            return Ok(v.to_string());
        }
        if let Some(v) = self.workflow_params.get(key).and_then(Value::as_str) {
            return Ok(v.to_string());
        }
        if let Some(v) = self.scratch.lock().get(key).and_then(Value::as_str) {
            return Ok(v.to_string());
        }
        Err(ActionError::MissingParam(key.to_string()))
    }

    pub fn ensure_live(&self) -> Result<(), ActionError> {
        if self.cancel.is_cancelled() {
            Err(ActionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub type ActionResult = Result<ActionOutcome, ActionError>;

#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult;
}

/// Registration table mapping kinds to implementations, built once.
pub struct ActionRegistry {
    actions: HashMap<ActionKind, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// All built-in actions registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ActionKind::FindBed, Arc::new(FindBed));
        registry.register(ActionKind::ReserveBed, Arc::new(ReserveBed));
        registry.register(ActionKind::NotifyStaff, Arc::new(NotifyStaff));
        registry.register(ActionKind::PersistAssignment, Arc::new(PersistAssignment));
        registry.register(ActionKind::NotifyHousekeeping, Arc::new(NotifyHousekeeping));
        registry.register(ActionKind::TrackCleaning, Arc::new(TrackCleaning));
        registry.register(ActionKind::QualityCheck, Arc::new(QualityCheck));
        registry.register(ActionKind::MarkBedAvailable, Arc::new(MarkBedAvailable));
        registry.register(ActionKind::BeginDischarge, Arc::new(BeginDischarge));
        registry.register(ActionKind::ReleaseBed, Arc::new(ReleaseBed));
        registry.register(ActionKind::NotifyAdmissions, Arc::new(NotifyAdmissions));
        registry
    }

    pub fn register(&mut self, kind: ActionKind, action: Arc<dyn Action>) {
        if self.actions.insert(kind, action).is_some() {
            warn!(action = %kind, "Action registration replaced an existing entry");
        }
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Action>> {
        self.actions.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Rank vacant beds for the patient and record the winner in scratch.
pub struct FindBed;

#[async_trait]
impl Action for FindBed {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let patient_id = PatientId::new(ctx.param_str(params, "patient_id")?);

        // A preassigned bed short-circuits the search
        if let Ok(bed_id) = ctx.param_str(params, "bed_id") {
            ctx.scratch
                .lock()
                .insert("bed_id".to_string(), json!(bed_id));
            return Ok(ActionOutcome::new("bed preassigned").with_data(json!({"bed_id": bed_id})));
        }

        let patient = ctx.store.get_patient(&patient_id).await?;
        let mut filter = BedFilter::vacant();
        if patient.requirements.isolation_required {
            filter.isolation_capable = Some(true);
        }
        let candidates = ctx.store.query_beds(&filter).await?;

        let best = scoring::rank(
            &candidates,
            &patient,
            &patient.requirements,
            &ctx.scoring,
            chrono::Utc::now(),
        )
        .filter(|s| s.total >= ctx.scoring.acceptance_threshold)
        .ok_or_else(|| {
            ActionError::Failed(format!("no suitable bed for patient {patient_id}"))
        })?;

        debug!(
            patient_id = %patient_id,
            bed_id = %best.bed_id,
            score = best.total,
            "🔍 Bed candidate selected"
        );
        ctx.scratch
            .lock()
            .insert("bed_id".to_string(), json!(best.bed_id.as_str()));
        ctx.scratch
            .lock()
            .insert("match_score".to_string(), json!(best.total));
        Ok(ActionOutcome::new(format!("selected bed {}", best.bed_id))
            .with_data(json!({"bed_id": best.bed_id.as_str(), "score": best.total})))
    }
}

/// Hold a vacant bed for an incoming patient (vacant → reserved CAS).
pub struct ReserveBed;

#[async_trait]
impl Action for ReserveBed {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let bed_id = BedId::new(ctx.param_str(params, "bed_id")?);

        let current = ctx.store.get_bed(&bed_id).await?;
        if current.status == BedStatus::Reserved
            || (current.status == BedStatus::Occupied && occupant_matches(&current, ctx, params))
        {
            return Ok(ActionOutcome::new(format!("bed {bed_id} already held")));
        }

        let bed = ctx
            .store
            .compare_and_swap_bed(&bed_id, BedStatus::Vacant, BedStatus::Reserved, None)
            .await?;
        info!(bed_id = %bed.id, ward = %bed.ward, "🔒 Bed reserved");
        Ok(ActionOutcome::new(format!("reserved bed {bed_id}")))
    }
}

fn occupant_matches(bed: &crate::models::Bed, ctx: &ActionContext, params: &Value) -> bool {
    match (ctx.param_str(params, "patient_id"), &bed.occupant) {
        (Ok(pid), Some(occupant)) => occupant.as_str() == pid,
        _ => false,
    }
}

/// Publish a staff notification event.
pub struct NotifyStaff;

#[async_trait]
impl Action for NotifyStaff {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let mut context = json!({});
        for key in ["patient_id", "bed_id", "ward", "message"] {
            if let Ok(v) = ctx.param_str(params, key) {
                context[key] = json!(v);
            }
        }
        ctx.publisher
            .publish(events::STAFF_NOTIFIED, context)
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(ActionOutcome::new("staff notified"))
    }
}

/// Commit the assignment: reserved → occupied, occupancy record, patient
/// record update, completion event. Idempotent when the bed is already
/// occupied by this patient.
pub struct PersistAssignment;

#[async_trait]
impl Action for PersistAssignment {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let bed_id = BedId::new(ctx.param_str(params, "bed_id")?);
        let patient_id = PatientId::new(ctx.param_str(params, "patient_id")?);

        let current = ctx.store.get_bed(&bed_id).await?;
        if current.status == BedStatus::Occupied
            && current.occupant.as_ref() == Some(&patient_id)
        {
            return Ok(ActionOutcome::new("assignment already persisted"));
        }

        let bed = ctx
            .store
            .compare_and_swap_bed(
                &bed_id,
                BedStatus::Reserved,
                BedStatus::Occupied,
                Some(patient_id.clone()),
            )
            .await?;

        let mut patient = ctx.store.get_patient(&patient_id).await?;
        patient.current_bed = Some(bed_id.clone());
        ctx.store.update_patient(patient).await?;
        ctx.store
            .append_occupancy(OccupancyRecord::admission(
                bed_id.clone(),
                patient_id.clone(),
                "workflow_assignment",
            ))
            .await?;

        let score = ctx
            .scratch
            .lock()
            .get("match_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        ctx.publisher
            .publish_assignment_completed(patient_id.as_str(), bed_id.as_str(), score)
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        info!(bed_id = %bed.id, patient_id = %patient_id, "✅ Assignment persisted");
        Ok(ActionOutcome::new(format!(
            "patient {patient_id} assigned to bed {bed_id}"
        )))
    }
}

/// Publish a housekeeping dispatch event for a bed turnover.
pub struct NotifyHousekeeping;

#[async_trait]
impl Action for NotifyHousekeeping {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let bed_id = ctx.param_str(params, "bed_id")?;
        let expedited = params
            .get("expedited")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        ctx.publisher
            .publish(
                events::HOUSEKEEPING_NOTIFIED,
                json!({"bed_id": bed_id, "expedited": expedited}),
            )
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(ActionOutcome::new(format!(
            "housekeeping dispatched to bed {bed_id}"
        )))
    }
}

/// Verify the bed is actually in cleaning before tracking its turnover.
pub struct TrackCleaning;

#[async_trait]
impl Action for TrackCleaning {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let bed_id = BedId::new(ctx.param_str(params, "bed_id")?);
        let bed = ctx.store.get_bed(&bed_id).await?;
        if bed.status != BedStatus::Cleaning {
            return Err(ActionError::Failed(format!(
                "bed {bed_id} is {}, expected cleaning",
                bed.status
            )));
        }
        ctx.scratch.lock().insert(
            "cleaning_started_at".to_string(),
            json!(bed.last_status_change.to_rfc3339()),
        );
        Ok(ActionOutcome::new(format!("tracking cleaning of bed {bed_id}")))
    }
}

/// Post-cleaning quality gate.
pub struct QualityCheck;

#[async_trait]
impl Action for QualityCheck {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let bed_id = BedId::new(ctx.param_str(params, "bed_id")?);
        // Confirms the record still exists and has not been diverted to
        // maintenance mid-turnover.
        let bed = ctx.store.get_bed(&bed_id).await?;
        if bed.status == BedStatus::Maintenance {
            return Err(ActionError::Failed(format!(
                "bed {bed_id} was diverted to maintenance"
            )));
        }
        Ok(ActionOutcome::new(format!("quality check passed for bed {bed_id}")))
    }
}

/// Return a cleaned bed to the vacant pool (cleaning → vacant CAS).
pub struct MarkBedAvailable;

#[async_trait]
impl Action for MarkBedAvailable {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let bed_id = BedId::new(ctx.param_str(params, "bed_id")?);
        let bed = ctx
            .store
            .compare_and_swap_bed(&bed_id, BedStatus::Cleaning, BedStatus::Vacant, None)
            .await?;
        info!(bed_id = %bed.id, ward = %bed.ward, "🟢 Bed returned to vacant pool");
        Ok(ActionOutcome::new(format!("bed {bed_id} available")))
    }
}

/// Open the discharge window for a patient.
pub struct BeginDischarge;

#[async_trait]
impl Action for BeginDischarge {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let patient_id = PatientId::new(ctx.param_str(params, "patient_id")?);
        let patient = ctx.store.get_patient(&patient_id).await?;
        if patient.archived {
            return Err(ActionError::Failed(format!(
                "patient {patient_id} already discharged"
            )));
        }
        ctx.publisher
            .publish(
                events::STAFF_NOTIFIED,
                json!({"patient_id": patient_id.as_str(), "message": "discharge started"}),
            )
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(ActionOutcome::new(format!("discharge started for {patient_id}")))
    }
}

/// Release the patient's bed into cleaning and archive the patient.
pub struct ReleaseBed;

#[async_trait]
impl Action for ReleaseBed {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let patient_id = PatientId::new(ctx.param_str(params, "patient_id")?);
        let mut patient = ctx.store.get_patient(&patient_id).await?;
        let bed_id = patient
            .current_bed
            .clone()
            .ok_or_else(|| ActionError::Failed(format!("patient {patient_id} has no bed")))?;

        ctx.store
            .compare_and_swap_bed(&bed_id, BedStatus::Occupied, BedStatus::Cleaning, None)
            .await?;
        patient.current_bed = None;
        patient.archived = true;
        ctx.store.update_patient(patient).await?;

        ctx.store
            .append_occupancy(OccupancyRecord::discharge(
                bed_id.clone(),
                patient_id.clone(),
                "discharge_workflow",
            ))
            .await?;

        ctx.scratch
            .lock()
            .insert("bed_id".to_string(), json!(bed_id.as_str()));
        info!(bed_id = %bed_id, patient_id = %patient_id, "🚪 Bed released into cleaning");
        Ok(ActionOutcome::new(format!("bed {bed_id} released")))
    }
}

/// Publish an admissions notification event.
pub struct NotifyAdmissions;

#[async_trait]
impl Action for NotifyAdmissions {
    async fn execute(&self, ctx: &ActionContext, params: &Value) -> ActionResult {
        ctx.ensure_live()?;
        let mut context = json!({});
        for key in ["bed_id", "ward", "message"] {
            if let Ok(v) = ctx.param_str(params, key) {
                context[key] = json!(v);
            }
        }
        ctx.publisher
            .publish(events::ADMISSIONS_NOTIFIED, context)
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(ActionOutcome::new("admissions notified"))
    }
}
