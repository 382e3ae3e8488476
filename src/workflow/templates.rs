//! # Workflow Templates
//!
//! Named step-graph builders for the recurring bed operations. A template
//! instantiates to a validated list of [`StepSpec`]s plus a default
//! priority; the executor owns everything after that.

use serde_json::{json, Value};
use std::time::Duration;

use crate::config::WorkflowConfig;
use crate::models::Priority;
use crate::workflow::actions::ActionKind;
use crate::workflow::types::StepSpec;
use crate::workflow::WorkflowError;

pub const BED_ASSIGNMENT: &str = "bed_assignment";
pub const BED_TURNOVER: &str = "bed_turnover";
pub const EXPEDITED_CLEANING: &str = "expedited_cleaning";
pub const DISCHARGE_PREPARATION: &str = "discharge_preparation";
pub const PATIENT_TRANSFER: &str = "patient_transfer";
pub const EMERGENCY_ALLOCATION: &str = "emergency_allocation";

pub fn known_templates() -> &'static [&'static str] {
    &[
        BED_ASSIGNMENT,
        BED_TURNOVER,
        EXPEDITED_CLEANING,
        DISCHARGE_PREPARATION,
        PATIENT_TRANSFER,
        EMERGENCY_ALLOCATION,
    ]
}

/// Parameter keys each template accepts; anything else is a client error.
pub(crate) fn allowed_params(template: &str) -> &'static [&'static str] {
    match template {
        BED_ASSIGNMENT | EMERGENCY_ALLOCATION => &["patient_id", "bed_id", "ward"],
        BED_TURNOVER | EXPEDITED_CLEANING => &["bed_id"],
        DISCHARGE_PREPARATION => &["patient_id"],
        PATIENT_TRANSFER => &["patient_id", "bed_id"],
        _ => &[],
    }
}

/// Build the step graph for `template` with the given workflow params.
///
/// Returns the specs and the template's default priority. Unknown
/// template names and unknown parameter keys are validation errors.
pub fn instantiate(
    template: &str,
    params: &Value,
    config: &WorkflowConfig,
) -> Result<(Vec<StepSpec>, Priority), WorkflowError> {
    if !known_templates().contains(&template) {
        return Err(WorkflowError::UnknownTemplate(template.to_string()));
    }
    if let Some(map) = params.as_object() {
        let allowed = allowed_params(template);
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "template {template} does not accept param {key}"
                )));
            }
        }
    } else if !params.is_null() {
        return Err(WorkflowError::Validation(
            "workflow params must be a JSON object".to_string(),
        ));
    }

    let timeout = Duration::from_secs(config.default_step_timeout_secs);
    let retries = config.default_max_retries;
    let step = |id: &str, action: ActionKind| {
        StepSpec::new(id, action)
            .with_timeout(timeout)
            .with_max_retries(retries)
    };

    let specs = match template {
        BED_ASSIGNMENT => vec![
            step("find_bed", ActionKind::FindBed),
            step("reserve_bed", ActionKind::ReserveBed).after(&["find_bed"]),
            step("notify_staff", ActionKind::NotifyStaff).after(&["reserve_bed"]),
            step("persist_assignment", ActionKind::PersistAssignment).after(&["reserve_bed"]),
        ],
        BED_TURNOVER => vec![
            step("notify_housekeeping", ActionKind::NotifyHousekeeping),
            step("track_cleaning", ActionKind::TrackCleaning).after(&["notify_housekeeping"]),
            step("quality_check", ActionKind::QualityCheck).after(&["track_cleaning"]),
            step("mark_bed_available", ActionKind::MarkBedAvailable).after(&["quality_check"]),
        ],
        // Turnover chain with tightened timeouts and an expedited flag
        // on the housekeeping dispatch.
        EXPEDITED_CLEANING => {
            let tight = Duration::from_secs((config.default_step_timeout_secs / 3).max(60));
            vec![
                step("notify_housekeeping", ActionKind::NotifyHousekeeping)
                    .with_params(json!({"expedited": true}))
                    .with_timeout(tight),
                step("track_cleaning", ActionKind::TrackCleaning)
                    .after(&["notify_housekeeping"])
                    .with_timeout(tight),
                step("quality_check", ActionKind::QualityCheck)
                    .after(&["track_cleaning"])
                    .with_timeout(tight),
                step("mark_bed_available", ActionKind::MarkBedAvailable)
                    .after(&["quality_check"])
                    .with_timeout(tight),
            ]
        }
        DISCHARGE_PREPARATION => vec![
            step("begin_discharge", ActionKind::BeginDischarge),
            step("release_bed", ActionKind::ReleaseBed).after(&["begin_discharge"]),
            step("notify_housekeeping", ActionKind::NotifyHousekeeping).after(&["release_bed"]),
        ],
        PATIENT_TRANSFER => vec![
            step("reserve_target", ActionKind::ReserveBed),
            step("release_source", ActionKind::ReleaseBed).after(&["reserve_target"]),
            step("persist_assignment", ActionKind::PersistAssignment).after(&["release_source"]),
        ],
        EMERGENCY_ALLOCATION => {
            let tight = Duration::from_secs((config.default_step_timeout_secs / 6).max(60));
            vec![
                step("find_bed", ActionKind::FindBed).with_timeout(tight),
                step("reserve_bed", ActionKind::ReserveBed)
                    .after(&["find_bed"])
                    .with_timeout(tight),
                step("persist_assignment", ActionKind::PersistAssignment)
                    .after(&["reserve_bed"])
                    .with_timeout(tight),
                step("notify_staff", ActionKind::NotifyStaff)
                    .after(&["persist_assignment"])
                    .with_timeout(tight),
            ]
        }
        _ => unreachable!("template name already validated"),
    };

    let priority = match template {
        EMERGENCY_ALLOCATION => Priority::Emergency,
        EXPEDITED_CLEANING => Priority::High,
        DISCHARGE_PREPARATION | PATIENT_TRANSFER => Priority::Medium,
        _ => Priority::High,
    };

    Ok((specs, priority))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_instantiate() {
        let config = WorkflowConfig::default();
        for name in known_templates() {
            let (specs, _) = instantiate(name, &Value::Null, &config).unwrap();
            assert!(!specs.is_empty(), "template {name} produced no steps");
        }
    }

    #[test]
    fn test_unknown_template_rejected() {
        let err = instantiate("room_service", &Value::Null, &WorkflowConfig::default())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownTemplate(_)));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let err = instantiate(
            BED_TURNOVER,
            &json!({"bed_id": "G-1", "floor": 3}),
            &WorkflowConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("floor"));
    }

    #[test]
    fn test_bed_assignment_fan_out() {
        let (specs, priority) =
            instantiate(BED_ASSIGNMENT, &json!({"patient_id": "P1"}), &WorkflowConfig::default())
                .unwrap();
        assert_eq!(priority, Priority::High);
        let notify = specs.iter().find(|s| s.id == "notify_staff").unwrap();
        let persist = specs.iter().find(|s| s.id == "persist_assignment").unwrap();
        // Both fan out from the reservation
        assert_eq!(notify.depends_on, vec!["reserve_bed"]);
        assert_eq!(persist.depends_on, vec!["reserve_bed"]);
    }

    #[test]
    fn test_expedited_cleaning_tightens_timeouts() {
        let config = WorkflowConfig::default();
        let (normal, _) = instantiate(BED_TURNOVER, &json!({"bed_id": "G-1"}), &config).unwrap();
        let (expedited, priority) =
            instantiate(EXPEDITED_CLEANING, &json!({"bed_id": "G-1"}), &config).unwrap();
        assert_eq!(priority, Priority::High);
        assert!(expedited[0].timeout < normal[0].timeout);
        assert_eq!(expedited[0].params["expedited"], json!(true));
    }
}
