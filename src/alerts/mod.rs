//! # Alerting
//!
//! Deduplicated alert lifecycle (create/merge, acknowledge, resolve,
//! remediation actions) plus the periodic monitors that feed it. The
//! monitor harness isolates failing monitors so one broken check never
//! takes hospital-wide alerting down with it.

pub mod engine;
pub mod monitor;
pub mod monitors;
pub mod types;

pub use engine::{AlertEngine, AlertFilter, SweepStats};
pub use monitor::{Monitor, MonitorContext, MonitorHarness};
pub use monitors::{
    BedAvailabilityMonitor, CapacityMonitor, CleaningOverdueMonitor, DischargeMonitor,
};
pub use types::{
    ActionReport, Alert, AlertDraft, AlertId, AlertPriority, AlertStatus, AlertType, DedupKey,
    RemediationAction,
};
