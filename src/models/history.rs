use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::bed::BedId;
use crate::models::patient::PatientId;

/// Append-only record of one bed occupancy span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub bed_id: BedId,
    pub patient_id: PatientId,
    pub admitted_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub assigned_by: String,
}

impl OccupancyRecord {
    pub fn admission(bed_id: BedId, patient_id: PatientId, assigned_by: impl Into<String>) -> Self {
        Self {
            bed_id,
            patient_id,
            admitted_at: Utc::now(),
            released_at: None,
            reason: "admission".to_string(),
            assigned_by: assigned_by.into(),
        }
    }

    pub fn discharge(bed_id: BedId, patient_id: PatientId, released_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            bed_id,
            patient_id,
            admitted_at: now,
            released_at: Some(now),
            reason: "discharge".to_string(),
            assigned_by: released_by.into(),
        }
    }
}

/// Append-only operational audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalLogEntry {
    pub component: String,
    pub action: String,
    pub details: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl OperationalLogEntry {
    pub fn new(
        component: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
            details: details.into(),
            outcome: outcome.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occupancy_record_constructors() {
        let admitted =
            OccupancyRecord::admission(BedId::new("G-1"), PatientId::new("P1"), "queue");
        assert_eq!(admitted.reason, "admission");
        assert!(admitted.released_at.is_none());

        let released =
            OccupancyRecord::discharge(BedId::new("G-1"), PatientId::new("P1"), "discharge_workflow");
        assert_eq!(released.reason, "discharge");
        assert_eq!(released.released_at, Some(released.admitted_at));
    }
}
