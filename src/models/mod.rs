//! # Domain Models
//!
//! Core data types for the bed operations domain: beds (resources),
//! patients (requesters), assignment requests, and append-only history
//! records. State enums carry `Display`/`FromStr` round-trips and serde
//! snake_case representations.

pub mod bed;
pub mod history;
pub mod patient;
pub mod request;

pub use bed::{Bed, BedId, BedKind, BedStatus, Ward};
pub use history::{OccupancyRecord, OperationalLogEntry};
pub use patient::{ConditionTag, MonitoringLevel, Patient, PatientId, RequirementSet, UrgencyClass};
pub use request::{AssignmentRequest, Priority, RequestToken};
