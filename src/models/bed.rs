use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::patient::PatientId;

/// Stable identifier for a bed, e.g. `"ICU-101"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BedId(pub String);

impl BedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ward / department a bed belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ward(pub String);

impl Ward {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clinical class of a bed, used by the match scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedKind {
    Icu,
    Emergency,
    Surgical,
    StepDown,
    General,
    Pediatric,
    Maternity,
    Isolation,
}

impl BedKind {
    /// Beds that can host patients needing continuous monitoring.
    pub fn is_high_acuity(&self) -> bool {
        matches!(self, Self::Icu | Self::Emergency | Self::StepDown)
    }
}

impl fmt::Display for BedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Icu => "icu",
            Self::Emergency => "emergency",
            Self::Surgical => "surgical",
            Self::StepDown => "step_down",
            Self::General => "general",
            Self::Pediatric => "pediatric",
            Self::Maternity => "maternity",
            Self::Isolation => "isolation",
        };
        write!(f, "{s}")
    }
}

/// Occupancy status of a bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BedStatus {
    #[default]
    Vacant,
    Occupied,
    Cleaning,
    Maintenance,
    Reserved,
}

impl BedStatus {
    /// Whether a bed in this status can accept a new occupant.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Vacant)
    }

    /// Whether the status requires an occupant reference.
    pub fn requires_occupant(&self) -> bool {
        matches!(self, Self::Occupied)
    }
}

impl fmt::Display for BedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vacant => "vacant",
            Self::Occupied => "occupied",
            Self::Cleaning => "cleaning",
            Self::Maintenance => "maintenance",
            Self::Reserved => "reserved",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vacant" => Ok(Self::Vacant),
            "occupied" => Ok(Self::Occupied),
            "cleaning" => Ok(Self::Cleaning),
            "maintenance" => Ok(Self::Maintenance),
            "reserved" => Ok(Self::Reserved),
            _ => Err(format!("Invalid bed status: {s}")),
        }
    }
}

/// A schedulable physical bed. Never destroyed, only status-transitioned.
///
/// Invariant: `status == Occupied` if and only if `occupant` is set. All
/// mutation goes through [`Bed::transition`], which rejects inconsistent
/// pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bed {
    pub id: BedId,
    pub ward: Ward,
    pub kind: BedKind,
    pub status: BedStatus,
    pub isolation_capable: bool,
    pub private_room: bool,
    pub last_status_change: DateTime<Utc>,
    pub occupant: Option<PatientId>,
}

impl Bed {
    pub fn new(id: BedId, ward: Ward, kind: BedKind) -> Self {
        Self {
            id,
            ward,
            kind,
            status: BedStatus::Vacant,
            isolation_capable: matches!(kind, BedKind::Isolation | BedKind::Icu),
            private_room: matches!(kind, BedKind::Isolation | BedKind::Icu),
            last_status_change: Utc::now(),
            occupant: None,
        }
    }

    pub fn with_features(mut self, isolation_capable: bool, private_room: bool) -> Self {
        self.isolation_capable = isolation_capable;
        self.private_room = private_room;
        self
    }

    /// Apply a status transition, keeping status and occupant consistent.
    ///
    /// Returns an error message when the pair violates the occupancy
    /// invariant; the bed is left unchanged in that case.
    pub fn transition(
        &mut self,
        status: BedStatus,
        occupant: Option<PatientId>,
    ) -> Result<(), String> {
        if status.requires_occupant() != occupant.is_some() {
            return Err(format!(
                "inconsistent transition for bed {}: status {status} with occupant {occupant:?}",
                self.id
            ));
        }
        self.status = status;
        self.occupant = occupant;
        self.last_status_change = Utc::now();
        Ok(())
    }

    /// Hours since the last status change, used by the scorer.
    pub fn hours_in_status(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_status_change).num_seconds() as f64 / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bed() -> Bed {
        Bed::new(BedId::new("ICU-1"), Ward::new("ICU"), BedKind::Icu)
    }

    #[test]
    fn test_transition_keeps_invariant() {
        let mut b = bed();
        assert!(b
            .transition(BedStatus::Occupied, Some(PatientId::new("P1")))
            .is_ok());
        assert_eq!(b.status, BedStatus::Occupied);
        assert!(b.occupant.is_some());

        assert!(b.transition(BedStatus::Cleaning, None).is_ok());
        assert!(b.occupant.is_none());
    }

    #[test]
    fn test_transition_rejects_inconsistent_pairs() {
        let mut b = bed();
        assert!(b.transition(BedStatus::Occupied, None).is_err());
        assert!(b
            .transition(BedStatus::Vacant, Some(PatientId::new("P1")))
            .is_err());
        // Unchanged after rejection
        assert_eq!(b.status, BedStatus::Vacant);
        assert!(b.occupant.is_none());
    }

    #[test]
    fn test_status_string_round_trip() {
        assert_eq!(BedStatus::Cleaning.to_string(), "cleaning");
        assert_eq!("occupied".parse::<BedStatus>().unwrap(), BedStatus::Occupied);
        assert!("unknown".parse::<BedStatus>().is_err());
    }

    #[test]
    fn test_assignable_statuses() {
        assert!(BedStatus::Vacant.is_assignable());
        assert!(!BedStatus::Reserved.is_assignable());
        assert!(!BedStatus::Cleaning.is_assignable());
    }
}
