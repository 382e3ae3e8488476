use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDraft, AlertEngine, AlertPriority, AlertType};
use crate::config::{QueueConfig, ScoringConfig};
use crate::constants::events;
use crate::constants::system::ASSIGNMENT_HISTORY_LIMIT;
use crate::error::{Result, WardflowError};
use crate::events::EventPublisher;
use crate::models::{
    AssignmentRequest, BedId, BedStatus, OccupancyRecord, PatientId, Priority, RequestToken,
    RequirementSet, Ward,
};
use crate::scoring::{self, BedMatchScore};
use crate::store::{BedFilter, PatientFilter, ResourceStore, StoreError};
use crate::workflow::templates::{BED_ASSIGNMENT, DISCHARGE_PREPARATION, EXPEDITED_CLEANING};
use crate::workflow::WorkflowExecutor;

/// What happened to the head request of one drain step.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    /// A bed was committed to the patient.
    Assigned {
        token: RequestToken,
        patient_id: PatientId,
        bed_id: BedId,
        score: f64,
    },
    /// No candidate matched; the request escalated or was requeued.
    Unmatched { token: RequestToken, requeued: bool },
    /// Second miss for a bumped request; handed to operators.
    Abandoned { token: RequestToken },
    /// The queue was empty.
    Idle,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub depth: usize,
    pub by_priority: Vec<(Priority, usize)>,
    pub oldest_wait_secs: Option<i64>,
}

/// Rolling assignment metrics.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub submitted: u64,
    pub assigned: u64,
    pub unmatched: u64,
    pub abandoned: u64,
    pub total_latency_ms: u64,
}

impl QueueMetrics {
    pub fn success_rate(&self) -> f64 {
        let settled = self.assigned + self.abandoned;
        if settled == 0 {
            0.0
        } else {
            self.assigned as f64 / settled as f64
        }
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.assigned == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.assigned as f64
        }
    }
}

/// One settled assignment, retained for the history view.
#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub token: RequestToken,
    pub patient_id: PatientId,
    pub bed_id: Option<BedId>,
    pub outcome: String,
    pub score: Option<f64>,
    pub settled_at: DateTime<Utc>,
}

pub struct AssignmentQueue {
    store: Arc<dyn ResourceStore>,
    publisher: Arc<EventPublisher>,
    alerts: Arc<AlertEngine>,
    executor: Arc<WorkflowExecutor>,
    scoring: ScoringConfig,
    config: QueueConfig,
    pending: Mutex<Vec<AssignmentRequest>>,
    history: Mutex<VecDeque<AssignmentRecord>>,
    metrics: Mutex<QueueMetrics>,
}

impl AssignmentQueue {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        publisher: Arc<EventPublisher>,
        alerts: Arc<AlertEngine>,
        executor: Arc<WorkflowExecutor>,
        scoring: ScoringConfig,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            alerts,
            executor,
            scoring,
            config,
            pending: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(QueueMetrics::default()),
        }
    }

    /// Accept a request into the queue. Malformed requests are rejected
    /// here; an unknown patient id only surfaces at processing time.
    pub async fn submit(&self, request: AssignmentRequest) -> Result<RequestToken> {
        if request.patient_id.as_str().trim().is_empty() {
            return Err(WardflowError::Validation(
                "patient id must not be empty".to_string(),
            ));
        }
        let token = request.token;
        {
            let mut pending = self.pending.lock();
            pending.push(request.clone());
            pending.sort_by_key(AssignmentRequest::sort_key);
        }
        self.metrics.lock().submitted += 1;

        debug!(
            token = %token,
            patient_id = %request.patient_id,
            priority = %request.priority,
            "Assignment request queued"
        );
        self.publisher
            .publish(
                events::ASSIGNMENT_REQUESTED,
                json!({
                    "token": token.to_string(),
                    "patient_id": request.patient_id.as_str(),
                    "priority": request.priority.to_string(),
                }),
            )
            .await
            .ok();
        Ok(token)
    }

    /// Process the head request and report its error, if any. The
    /// batch-level failure isolation lives in [`AssignmentQueue::drain`].
    pub async fn process_next(&self) -> Result<AssignmentOutcome> {
        let request = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(AssignmentOutcome::Idle);
            }
            pending.remove(0)
        };
        self.settle(request).await
    }

    /// Drain one batch, isolating per-request failures: a scorer or
    /// store error on one request raises a medium alert and moves on.
    /// Only requests pending at entry are settled; a request requeued
    /// with a bump mid-drain stays queued for the next cycle, since no
    /// capacity can have freed within this one.
    pub async fn drain(&self) -> Result<Vec<AssignmentOutcome>> {
        let batch = std::mem::take(&mut *self.pending.lock());
        let mut outcomes = Vec::new();
        for request in batch {
            match self.settle(request).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "Assignment request failed, continuing drain");
                    self.alerts
                        .create(AlertDraft::new(
                            AlertType::AssignmentFailed,
                            AlertPriority::Medium,
                            "Assignment processing error",
                            e.to_string(),
                        ))
                        .await
                        .ok();
                }
            }
        }
        Ok(outcomes)
    }

    async fn settle(&self, request: AssignmentRequest) -> Result<AssignmentOutcome> {
        match self.try_assign(&request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Put the failure on record before surfacing it.
                self.record(&request, None, None, &format!("error: {e}"));
                Err(e)
            }
        }
    }

    async fn try_assign(&self, request: &AssignmentRequest) -> Result<AssignmentOutcome> {
        let patient = self.store.get_patient(&request.patient_id).await?;
        let mut candidates = self.candidates(&request.requirements).await?;

        // Optimistic loop: a CAS conflict means another drain took the
        // bed between scoring and commit; re-rank what is left.
        loop {
            let best = scoring::rank(
                &candidates,
                &patient,
                &request.requirements,
                &self.scoring,
                Utc::now(),
            )
            .filter(|s| s.total >= self.scoring.acceptance_threshold);

            let Some(best) = best else {
                return self.handle_unmatched(request).await;
            };

            match self
                .commit(&request.patient_id, &best.bed_id, best.total, "queue")
                .await
            {
                Ok(()) => {
                    let latency = (Utc::now() - request.submitted_at).num_milliseconds().max(0);
                    {
                        let mut metrics = self.metrics.lock();
                        metrics.assigned += 1;
                        metrics.total_latency_ms += latency as u64;
                    }
                    self.record(request, Some(best.bed_id.clone()), Some(best.total), "assigned");
                    info!(
                        token = %request.token,
                        patient_id = %request.patient_id,
                        bed_id = %best.bed_id,
                        score = best.total,
                        confidence = best.confidence,
                        "🛏️ Bed assigned"
                    );

                    // Post-assignment workflow: staff notification and
                    // record-keeping steps against the committed bed.
                    if let Err(e) = self.post_assignment_workflow(request, &best.bed_id).await {
                        warn!(error = %e, "Post-assignment workflow failed to start");
                    }
                    return Ok(AssignmentOutcome::Assigned {
                        token: request.token,
                        patient_id: request.patient_id.clone(),
                        bed_id: best.bed_id,
                        score: best.total,
                    });
                }
                Err(WardflowError::Store(StoreError::Conflict { .. })) => {
                    debug!(bed_id = %best.bed_id, "Lost assignment race, re-ranking");
                    candidates.retain(|bed| bed.id != best.bed_id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn candidates(&self, requirements: &RequirementSet) -> Result<Vec<crate::models::Bed>> {
        let mut filter = BedFilter::vacant();
        if requirements.isolation_required {
            filter.isolation_capable = Some(true);
        }
        Ok(self.store.query_beds(&filter).await?)
    }

    /// Commit an assignment: the CAS is the only synchronization point.
    async fn commit(
        &self,
        patient_id: &PatientId,
        bed_id: &BedId,
        score: f64,
        assigned_by: &str,
    ) -> Result<()> {
        self.store
            .compare_and_swap_bed(
                bed_id,
                BedStatus::Vacant,
                BedStatus::Occupied,
                Some(patient_id.clone()),
            )
            .await?;

        let mut patient = self.store.get_patient(patient_id).await?;
        patient.current_bed = Some(bed_id.clone());
        self.store.update_patient(patient).await?;
        self.store
            .append_occupancy(OccupancyRecord::admission(
                bed_id.clone(),
                patient_id.clone(),
                assigned_by,
            ))
            .await?;
        self.publisher
            .publish_assignment_completed(patient_id.as_str(), bed_id.as_str(), score)
            .await
            .ok();
        Ok(())
    }

    async fn post_assignment_workflow(
        &self,
        request: &AssignmentRequest,
        bed_id: &BedId,
    ) -> Result<()> {
        let id = self
            .executor
            .create(
                BED_ASSIGNMENT,
                json!({
                    "patient_id": request.patient_id.as_str(),
                    "bed_id": bed_id.as_str(),
                }),
            )
            .await?;
        self.executor.run_to_completion(id).await?;
        Ok(())
    }

    async fn handle_unmatched(&self, request: &AssignmentRequest) -> Result<AssignmentOutcome> {
        self.publisher
            .publish(
                events::ASSIGNMENT_UNMATCHED,
                json!({
                    "token": request.token.to_string(),
                    "patient_id": request.patient_id.as_str(),
                    "priority": request.priority.to_string(),
                }),
            )
            .await
            .ok();

        if request.priority.escalates() {
            self.escalate(request).await?;
            self.metrics.lock().unmatched += 1;
            self.record(request, None, None, "escalated");
            return Ok(AssignmentOutcome::Unmatched {
                token: request.token,
                requeued: false,
            });
        }

        if !request.bumped {
            // One bump, back to the tail of its new priority band.
            let mut bumped = request.clone();
            bumped.bumped = true;
            bumped.priority = request.priority.bumped();
            debug!(
                token = %request.token,
                from = %request.priority,
                to = %bumped.priority,
                "Request bumped and requeued"
            );
            let mut pending = self.pending.lock();
            pending.push(bumped);
            pending.sort_by_key(AssignmentRequest::sort_key);
            self.metrics.lock().unmatched += 1;
            return Ok(AssignmentOutcome::Unmatched {
                token: request.token,
                requeued: true,
            });
        }

        // Second miss: leave it for the operators.
        warn!(
            token = %request.token,
            patient_id = %request.patient_id,
            "Request abandoned after second miss"
        );
        self.alerts
            .create(
                AlertDraft::new(
                    AlertType::AssignmentFailed,
                    AlertPriority::Medium,
                    format!("No bed found for patient {}", request.patient_id),
                    "Request missed twice after a priority bump; manual placement needed"
                        .to_string(),
                )
                .related_patient(request.patient_id.clone())
                .department(
                    request
                        .requirements
                        .preferred_ward
                        .clone()
                        .unwrap_or_else(|| Ward::new("admissions")),
                ),
            )
            .await?;
        self.publisher
            .publish(
                events::ASSIGNMENT_ABANDONED,
                json!({"token": request.token.to_string(), "patient_id": request.patient_id.as_str()}),
            )
            .await
            .ok();
        self.metrics.lock().abandoned += 1;
        self.record(request, None, None, "abandoned");
        Ok(AssignmentOutcome::Abandoned {
            token: request.token,
        })
    }

    /// Emergency/Urgent no-match: critical alert keyed on the requested
    /// ward, plus expedite workflows for beds in cleaning and patients
    /// inside the discharge window.
    async fn escalate(&self, request: &AssignmentRequest) -> Result<()> {
        let ward = request
            .requirements
            .preferred_ward
            .clone()
            .unwrap_or_else(|| Ward::new("hospital"));
        warn!(
            token = %request.token,
            patient_id = %request.patient_id,
            ward = %ward,
            priority = %request.priority,
            "⚠️ Urgent request unmatched, escalating"
        );
        self.alerts
            .create(
                AlertDraft::new(
                    AlertType::NoBedsAvailable,
                    AlertPriority::Critical,
                    format!("No beds available for {} request", request.priority),
                    format!(
                        "Patient {} ({}) cannot be placed; expediting turnovers and discharges",
                        request.patient_id, request.priority
                    ),
                )
                .department(ward)
                .related_patient(request.patient_id.clone()),
            )
            .await?;

        let cleaning = self
            .store
            .query_beds(&BedFilter::with_status(BedStatus::Cleaning))
            .await?;
        for bed in cleaning.into_iter().take(self.config.expedite_cleaning_limit) {
            self.executor
                .create_guarded(EXPEDITED_CLEANING, json!({"bed_id": bed.id.as_str()}))
                .await?;
        }

        let mut filter = PatientFilter::active();
        filter.discharge_within_hours = Some(self.config.expedite_discharge_horizon_hours);
        let departing = self.store.query_patients(&filter).await?;
        for patient in departing.into_iter().filter(|p| p.current_bed.is_some()) {
            self.executor
                .create_guarded(
                    DISCHARGE_PREPARATION,
                    json!({"patient_id": patient.id.as_str()}),
                )
                .await?;
        }
        Ok(())
    }

    /// Operator override: no scoring, still CAS-checked.
    pub async fn force_assign(
        &self,
        patient_id: &PatientId,
        bed_id: &BedId,
        reason: &str,
    ) -> Result<()> {
        self.commit(patient_id, bed_id, 0.0, "operator_override").await?;
        self.store
            .append_log(crate::models::OperationalLogEntry::new(
                "assignment_queue",
                "force_assign",
                format!("patient {patient_id} to bed {bed_id}: {reason}"),
                "success",
            ))
            .await?;
        info!(patient_id = %patient_id, bed_id = %bed_id, reason, "Forced assignment");
        Ok(())
    }

    /// Non-mutating ranked candidate list for a patient.
    pub async fn recommendations(
        &self,
        patient_id: &PatientId,
        top_n: usize,
    ) -> Result<Vec<BedMatchScore>> {
        let patient = self.store.get_patient(patient_id).await?;
        let candidates = self.candidates(&patient.requirements).await?;
        let now = Utc::now();
        let mut scores: Vec<BedMatchScore> = candidates
            .iter()
            .map(|bed| scoring::score(bed, &patient, &patient.requirements, &self.scoring, now))
            .collect();
        scores.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores.truncate(top_n);
        Ok(scores)
    }

    pub fn queue_status(&self) -> QueueStatus {
        let pending = self.pending.lock();
        let now = Utc::now();
        let mut by_priority: Vec<(Priority, usize)> = Vec::new();
        for request in pending.iter() {
            match by_priority.iter_mut().find(|(p, _)| *p == request.priority) {
                Some((_, count)) => *count += 1,
                None => by_priority.push((request.priority, 1)),
            }
        }
        QueueStatus {
            depth: pending.len(),
            by_priority,
            oldest_wait_secs: pending
                .iter()
                .map(|r| (now - r.submitted_at).num_seconds())
                .max(),
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.metrics.lock().clone()
    }

    pub fn assignment_history(&self, limit: usize) -> Vec<AssignmentRecord> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Pending request count, used by the predictive occupancy job.
    pub fn depth(&self) -> usize {
        self.pending.lock().len()
    }

    fn record(
        &self,
        request: &AssignmentRequest,
        bed_id: Option<BedId>,
        score: Option<f64>,
        outcome: &str,
    ) {
        let mut history = self.history.lock();
        history.push_back(AssignmentRecord {
            token: request.token,
            patient_id: request.patient_id.clone(),
            bed_id,
            outcome: outcome.to_string(),
            score,
            settled_at: Utc::now(),
        });
        while history.len() > ASSIGNMENT_HISTORY_LIMIT {
            history.pop_front();
        }
    }
}
