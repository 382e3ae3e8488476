//! Workflow execution against the assembled engine: template runs with
//! real bed state transitions, parameter validation, and cancellation.

use std::sync::Arc;

use serde_json::json;
use wardflow_core::workflow::templates;
use wardflow_core::{
    Bed, BedId, BedKind, BedStatus, Patient, PatientId, ResourceStore, UrgencyClass, Ward,
    WardflowConfig, WardflowError, WardflowSystem, WorkflowState,
};

fn system() -> Arc<WardflowSystem> {
    Arc::new(WardflowSystem::new(WardflowConfig::default()).unwrap())
}

#[tokio::test]
async fn test_bed_turnover_returns_bed_to_service() {
    let sys = system();
    let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
    bed.transition(BedStatus::Cleaning, None).unwrap();
    sys.add_bed(bed).await.unwrap();

    let id = sys
        .start_workflow(templates::BED_TURNOVER, json!({"bed_id": "G-1"}))
        .await
        .unwrap();
    let state = sys.run_workflow(id).await.unwrap();
    assert_eq!(state, WorkflowState::Complete);

    let status = sys.workflow_status(id).unwrap();
    assert_eq!(status.steps_complete, status.steps_total);
    assert!(status.completed_at.is_some());

    let bed = sys.store().get_bed(&BedId::new("G-1")).await.unwrap();
    assert_eq!(bed.status, BedStatus::Vacant);
}

#[tokio::test]
async fn test_discharge_preparation_frees_bed_and_archives_patient() {
    let sys = system();
    let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
    bed.transition(BedStatus::Occupied, Some(PatientId::new("P-1")))
        .unwrap();
    sys.add_bed(bed).await.unwrap();
    let mut patient = Patient::new(PatientId::new("P-1"), UrgencyClass::Medium);
    patient.current_bed = Some(BedId::new("G-1"));
    sys.add_patient(patient).await.unwrap();

    let id = sys
        .start_workflow(
            templates::DISCHARGE_PREPARATION,
            json!({"patient_id": "P-1"}),
        )
        .await
        .unwrap();
    let state = sys.run_workflow(id).await.unwrap();
    assert_eq!(state, WorkflowState::Complete);

    // Discharge releases the bed into cleaning and archives the patient
    let bed = sys.store().get_bed(&BedId::new("G-1")).await.unwrap();
    assert_eq!(bed.status, BedStatus::Cleaning);
    assert_eq!(bed.occupant, None);
    let patient = sys.store().get_patient(&PatientId::new("P-1")).await.unwrap();
    assert!(patient.archived);
}

#[tokio::test]
async fn test_turnover_fails_when_bed_is_not_in_cleaning() {
    let sys = system();
    sys.add_bed(Bed::new(
        BedId::new("G-1"),
        Ward::new("General"),
        BedKind::General,
    ))
    .await
    .unwrap();

    let id = sys
        .start_workflow(templates::BED_TURNOVER, json!({"bed_id": "G-1"}))
        .await
        .unwrap();
    let state = sys.run_workflow(id).await.unwrap();
    assert_eq!(state, WorkflowState::Failed);
    let status = sys.workflow_status(id).unwrap();
    assert!(status.failure_reason.is_some());
}

#[tokio::test]
async fn test_unknown_template_and_params_are_rejected() {
    let sys = system();

    let err = sys
        .start_workflow("room_service", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, WardflowError::Validation(_)));

    let err = sys
        .start_workflow(templates::BED_TURNOVER, json!({"bed_id": "G-1", "speed": "max"}))
        .await
        .unwrap_err();
    assert!(matches!(err, WardflowError::Validation(_)));
}

#[tokio::test]
async fn test_cancel_stops_a_pending_workflow() {
    let sys = system();
    let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
    bed.transition(BedStatus::Cleaning, None).unwrap();
    sys.add_bed(bed).await.unwrap();

    let id = sys
        .start_workflow(templates::BED_TURNOVER, json!({"bed_id": "G-1"}))
        .await
        .unwrap();
    sys.cancel_workflow(id).await.unwrap();

    let status = sys.workflow_status(id).unwrap();
    assert_eq!(status.state, WorkflowState::Cancelled);
    // Cancelled workflows drop out of the active view
    assert!(sys.active_workflows().iter().all(|w| w.id != id));

    // A second cancel is an error, the workflow is already terminal
    assert!(sys.cancel_workflow(id).await.is_err());
}
