//! # System Constants
//!
//! Event names, capacity thresholds, and status groupings that define
//! the operational boundaries of the bed operations core.

use crate::models::BedStatus;

/// Lifecycle events emitted through the notification sink
pub mod events {
    // Assignment lifecycle events
    pub const ASSIGNMENT_REQUESTED: &str = "assignment.requested";
    pub const ASSIGNMENT_COMPLETED: &str = "assignment.completed";
    pub const ASSIGNMENT_UNMATCHED: &str = "assignment.unmatched";
    pub const ASSIGNMENT_ABANDONED: &str = "assignment.abandoned";

    // Workflow lifecycle events
    pub const WORKFLOW_CREATED: &str = "workflow.created";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const WORKFLOW_STEP_COMPLETED: &str = "workflow.step_completed";
    pub const WORKFLOW_STEP_FAILED: &str = "workflow.step_failed";

    // Alert lifecycle events
    pub const ALERT_CREATED: &str = "alert.created";
    pub const ALERT_UPDATED: &str = "alert.updated";
    pub const ALERT_ACKNOWLEDGED: &str = "alert.acknowledged";
    pub const ALERT_RESOLVED: &str = "alert.resolved";
    pub const ALERT_ACTION_EXECUTED: &str = "alert.action_executed";

    // Scheduler events
    pub const JOB_COMPLETED: &str = "scheduler.job_completed";
    pub const JOB_FAILED: &str = "scheduler.job_failed";

    // Staff/housekeeping notifications emitted by workflow steps
    pub const STAFF_NOTIFIED: &str = "staff.notified";
    pub const HOUSEKEEPING_NOTIFIED: &str = "housekeeping.notified";
    pub const ADMISSIONS_NOTIFIED: &str = "admissions.notified";
}

/// Ward occupancy thresholds (percent) driving capacity alerts
pub mod capacity {
    /// High-occupancy warning threshold
    pub const HIGH_OCCUPANCY_PCT: f64 = 80.0;

    /// Critical-occupancy threshold
    pub const CRITICAL_OCCUPANCY_PCT: f64 = 90.0;

    /// Projected-occupancy threshold for the predictive check
    pub const PREDICTED_CRITICAL_PCT: f64 = 95.0;
}

/// System-wide limits
pub mod system {
    /// Maximum number of steps in a single workflow
    pub const MAX_WORKFLOW_STEPS: usize = 64;

    /// How many in-memory assignment history records to retain
    pub const ASSIGNMENT_HISTORY_LIMIT: usize = 100;

    /// How many scheduler execution records to retain
    pub const JOB_HISTORY_LIMIT: usize = 100;

    /// Version marker
    pub const WARDFLOW_CORE_VERSION: &str = "0.1.0";
}

/// Status groupings for validation and monitor logic
pub mod status_groups {
    use super::BedStatus;

    /// Bed statuses that monitors treat as "in turnover"
    pub const TURNOVER_STATUSES: &[BedStatus] = &[BedStatus::Cleaning, BedStatus::Maintenance];

    /// Bed statuses a new assignment may target
    pub const ASSIGNABLE_STATUSES: &[BedStatus] = &[BedStatus::Vacant];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ordering() {
        assert!(capacity::HIGH_OCCUPANCY_PCT < capacity::CRITICAL_OCCUPANCY_PCT);
        assert!(capacity::CRITICAL_OCCUPANCY_PCT < capacity::PREDICTED_CRITICAL_PCT);
    }

    #[test]
    fn test_status_groups() {
        assert!(status_groups::TURNOVER_STATUSES.contains(&BedStatus::Cleaning));
        assert!(!status_groups::ASSIGNABLE_STATUSES.contains(&BedStatus::Reserved));
    }
}
