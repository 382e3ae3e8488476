use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::patient::{PatientId, RequirementSet};

/// Five-level assignment priority. Lower ordinal means more urgent;
/// the queue sorts ascending by `(ordinal, submitted_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Emergency,
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Emergency => 1,
            Self::Urgent => 2,
            Self::High => 3,
            Self::Medium => 4,
            Self::Low => 5,
        }
    }

    /// The top two classes escalate instead of requeueing on no-match.
    pub fn escalates(&self) -> bool {
        matches!(self, Self::Emergency | Self::Urgent)
    }

    /// One level more urgent, saturating at `Emergency`.
    pub fn bumped(&self) -> Self {
        match self {
            Self::Emergency => Self::Emergency,
            Self::Urgent => Self::Emergency,
            Self::High => Self::Urgent,
            Self::Medium => Self::High,
            Self::Low => Self::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Emergency => "emergency",
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Opaque token returned to the ingress layer when a request is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(pub Uuid);

impl RequestToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending request for a bed, consumed by the assignment queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub token: RequestToken,
    pub patient_id: PatientId,
    pub priority: Priority,
    pub requirements: RequirementSet,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    /// Requeue bump bookkeeping: a request is bumped at most once.
    pub bumped: bool,
}

impl AssignmentRequest {
    pub fn new(patient_id: PatientId, priority: Priority, requirements: RequirementSet) -> Self {
        Self {
            token: RequestToken::generate(),
            patient_id,
            priority,
            requirements,
            submitted_at: Utc::now(),
            deadline: None,
            bumped: false,
        }
    }

    /// Queue sort key: priority ordinal first, arrival time second.
    pub fn sort_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority.ordinal(), self.submitted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bump_saturates() {
        assert_eq!(Priority::Low.bumped(), Priority::Medium);
        assert_eq!(Priority::Medium.bumped(), Priority::High);
        assert_eq!(Priority::Urgent.bumped(), Priority::Emergency);
        assert_eq!(Priority::Emergency.bumped(), Priority::Emergency);
    }

    #[test]
    fn test_escalation_classes() {
        assert!(Priority::Emergency.escalates());
        assert!(Priority::Urgent.escalates());
        assert!(!Priority::High.escalates());
        assert!(!Priority::Low.escalates());
    }
}
