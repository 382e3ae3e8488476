//! # Resource Store
//!
//! The storage boundary of the core. The orchestration engine only ever
//! talks to [`ResourceStore`]; the bundled [`MemoryStore`] is the
//! reference implementation used in-process and in tests. Mutation is
//! all-or-nothing per record, and the only cross-task coordination
//! primitive is the per-bed compare-and-swap, which keeps the core
//! portable to a store-backed multi-instance deployment.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{
    Bed, BedId, BedKind, BedStatus, OccupancyRecord, OperationalLogEntry, Patient, PatientId, Ward,
};

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The compare-and-swap precondition no longer held. Callers treat
    /// this as "resource no longer available" and move on.
    #[error("Conflict on {record}: expected {expected}, found {actual}")]
    Conflict {
        record: String,
        expected: String,
        actual: String,
    },

    /// Transient failure; retry within the caller's own backoff budget.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Query filter for beds. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct BedFilter {
    pub status: Option<BedStatus>,
    pub ward: Option<Ward>,
    pub kind: Option<BedKind>,
    pub isolation_capable: Option<bool>,
    pub private_room: Option<bool>,
    /// Only beds whose last status change is at or after this instant.
    pub changed_since: Option<DateTime<Utc>>,
}

impl BedFilter {
    pub fn vacant() -> Self {
        Self {
            status: Some(BedStatus::Vacant),
            ..Default::default()
        }
    }

    pub fn with_status(status: BedStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, bed: &Bed) -> bool {
        self.status.map_or(true, |s| bed.status == s)
            && self.ward.as_ref().map_or(true, |w| &bed.ward == w)
            && self.kind.map_or(true, |k| bed.kind == k)
            && self
                .isolation_capable
                .map_or(true, |i| bed.isolation_capable == i)
            && self.private_room.map_or(true, |p| bed.private_room == p)
            && self
                .changed_since
                .map_or(true, |t| bed.last_status_change >= t)
    }
}

/// Query filter for patients.
#[derive(Debug, Clone, Default)]
pub struct PatientFilter {
    pub archived: Option<bool>,
    pub unassigned_only: bool,
    /// Only patients expected to discharge within this many hours.
    pub discharge_within_hours: Option<i64>,
}

impl PatientFilter {
    pub fn active() -> Self {
        Self {
            archived: Some(false),
            ..Default::default()
        }
    }

    pub fn matches(&self, patient: &Patient, now: DateTime<Utc>) -> bool {
        self.archived.map_or(true, |a| patient.archived == a)
            && (!self.unassigned_only || patient.current_bed.is_none())
            && self
                .discharge_within_hours
                .map_or(true, |h| patient.discharge_within(now, h))
    }
}

/// Per-ward occupancy snapshot used by the capacity monitors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WardCensus {
    pub total: usize,
    pub occupied: usize,
    pub vacant: usize,
    pub cleaning: usize,
}

impl WardCensus {
    pub fn occupancy_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.occupied as f64 / self.total as f64 * 100.0
        }
    }
}

/// Abstract store for beds, patients, and append-only history.
///
/// No multi-record transactions are assumed; the one atomic primitive is
/// [`ResourceStore::compare_and_swap_bed`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_bed(&self, id: &BedId) -> StoreResult<Bed>;

    async fn query_beds(&self, filter: &BedFilter) -> StoreResult<Vec<Bed>>;

    /// Insert or replace a bed record (provisioning path).
    async fn put_bed(&self, bed: Bed) -> StoreResult<()>;

    /// Atomically transition a bed's status if and only if its current
    /// status equals `expected`. Returns the updated bed on success and
    /// [`StoreError::Conflict`] when the precondition fails.
    async fn compare_and_swap_bed(
        &self,
        id: &BedId,
        expected: BedStatus,
        new_status: BedStatus,
        occupant: Option<PatientId>,
    ) -> StoreResult<Bed>;

    async fn get_patient(&self, id: &PatientId) -> StoreResult<Patient>;

    async fn query_patients(&self, filter: &PatientFilter) -> StoreResult<Vec<Patient>>;

    async fn put_patient(&self, patient: Patient) -> StoreResult<()>;

    /// Apply a whole-record update to a patient (last-write-wins).
    async fn update_patient(&self, patient: Patient) -> StoreResult<()>;

    async fn append_occupancy(&self, record: OccupancyRecord) -> StoreResult<()>;

    async fn append_log(&self, entry: OperationalLogEntry) -> StoreResult<()>;

    async fn occupancy_history(&self, bed: &BedId, limit: usize) -> StoreResult<Vec<OccupancyRecord>>;

    /// Per-ward occupancy counts for capacity monitoring.
    async fn ward_census(&self) -> StoreResult<HashMap<Ward, WardCensus>>;
}
