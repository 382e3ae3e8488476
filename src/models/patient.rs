use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::bed::{BedId, Ward};

/// Stable identifier for a patient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub String);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Urgency class assigned at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyClass {
    Emergency,
    Urgent,
    High,
    Medium,
    Low,
}

/// Clinical condition tags driving the match scorer's rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTag {
    Critical,
    Trauma,
    Surgical,
    PostOp,
    Cardiac,
    Neuro,
    Ortho,
    Pediatric,
    Maternity,
    Infectious,
    Immunocompromised,
    Palliative,
}

/// Monitoring intensity required for a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringLevel {
    #[default]
    Standard,
    Elevated,
    High,
}

/// Hard requirements and soft preferences attached to a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementSet {
    pub isolation_required: bool,
    pub monitoring_level: MonitoringLevel,
    pub private_room_preferred: bool,
    pub preferred_ward: Option<Ward>,
}

impl RequirementSet {
    pub fn isolation() -> Self {
        Self {
            isolation_required: true,
            ..Default::default()
        }
    }
}

/// A patient needing (or occupying) a bed. Archived on discharge,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub urgency: UrgencyClass,
    pub condition_tags: Vec<ConditionTag>,
    pub requirements: RequirementSet,
    pub current_bed: Option<BedId>,
    pub expected_discharge: Option<DateTime<Utc>>,
    pub admitted_at: DateTime<Utc>,
    pub archived: bool,
}

impl Patient {
    pub fn new(id: PatientId, urgency: UrgencyClass) -> Self {
        Self {
            id,
            urgency,
            condition_tags: Vec::new(),
            requirements: RequirementSet::default(),
            current_bed: None,
            expected_discharge: None,
            admitted_at: Utc::now(),
            archived: false,
        }
    }

    pub fn with_tags(mut self, tags: Vec<ConditionTag>) -> Self {
        self.condition_tags = tags;
        self
    }

    pub fn with_requirements(mut self, requirements: RequirementSet) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn has_tag(&self, tag: ConditionTag) -> bool {
        self.condition_tags.contains(&tag)
    }

    /// Whether the patient is expected to leave within `horizon_hours`.
    pub fn discharge_within(&self, now: DateTime<Utc>, horizon_hours: i64) -> bool {
        self.expected_discharge
            .map(|d| d >= now && d <= now + chrono::Duration::hours(horizon_hours))
            .unwrap_or(false)
    }
}
