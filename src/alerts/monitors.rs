//! Built-in monitors: ward capacity, bed availability, upcoming
//! discharges, and overdue cleanings.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::debug;

use crate::alerts::monitor::{Monitor, MonitorContext};
use crate::alerts::types::{AlertDraft, AlertPriority, AlertType, RemediationAction};
use crate::constants::capacity;
use crate::error::Result;
use crate::models::BedStatus;
use crate::store::{BedFilter, PatientFilter};
use crate::workflow::templates::{DISCHARGE_PREPARATION, EXPEDITED_CLEANING};
use crate::workflow::ActionKind;

/// Raises capacity alerts per ward: high at 80%, critical at 90%, and a
/// no-beds alert when a ward has no vacant bed at all.
pub struct CapacityMonitor;

#[async_trait]
impl Monitor for CapacityMonitor {
    fn name(&self) -> &'static str {
        "ward_capacity"
    }

    async fn check(&self, ctx: &MonitorContext) -> Result<()> {
        let census = ctx.store.ward_census().await?;
        for (ward, counts) in census {
            let rate = counts.occupancy_rate();
            debug!(ward = %ward, occupancy = rate, vacant = counts.vacant, "Capacity check");

            if rate >= capacity::CRITICAL_OCCUPANCY_PCT {
                ctx.alerts
                    .create(
                        AlertDraft::new(
                            AlertType::CapacityCritical,
                            AlertPriority::Critical,
                            format!("Critical occupancy in {ward}"),
                            format!("{ward} at {rate:.0}% occupancy ({}/{} beds)",
                                counts.occupied, counts.total),
                        )
                        .department(ward.clone())
                        .meta("occupancy_pct", json!(rate))
                        .action(
                            RemediationAction::new(
                                "expedite_cleaning",
                                "Expedite ward cleanings",
                                ActionKind::NotifyHousekeeping,
                            )
                            .describe("Queue expedited turnover for beds stuck in cleaning")
                            .gated()
                            .with_params(json!({"expedite_ward_cleaning": ward.as_str()})),
                        ),
                    )
                    .await?;
            } else if rate >= capacity::HIGH_OCCUPANCY_PCT {
                ctx.alerts
                    .create(
                        AlertDraft::new(
                            AlertType::CapacityHigh,
                            AlertPriority::High,
                            format!("High occupancy in {ward}"),
                            format!("{ward} at {rate:.0}% occupancy"),
                        )
                        .department(ward.clone())
                        .meta("occupancy_pct", json!(rate)),
                    )
                    .await?;
            }

            if counts.total > 0 && counts.vacant == 0 {
                ctx.alerts
                    .create(
                        AlertDraft::new(
                            AlertType::NoBedsAvailable,
                            AlertPriority::Critical,
                            format!("No vacant beds in {ward}"),
                            format!("{ward} has zero assignable beds"),
                        )
                        .department(ward),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Flags recently vacated beds in wards under capacity pressure so
/// admissions can claim them before the next full queue pass. Alerts
/// expire after the configured TTL and carry an auto-executable
/// admissions notification.
pub struct BedAvailabilityMonitor;

#[async_trait]
impl Monitor for BedAvailabilityMonitor {
    fn name(&self) -> &'static str {
        "bed_availability"
    }

    async fn check(&self, ctx: &MonitorContext) -> Result<()> {
        let census = ctx.store.ward_census().await?;
        let pressured: Vec<_> = census
            .into_iter()
            .filter(|(_, c)| c.occupancy_rate() >= capacity::HIGH_OCCUPANCY_PCT)
            .map(|(ward, _)| ward)
            .collect();
        if pressured.is_empty() {
            return Ok(());
        }

        let mut filter = BedFilter::vacant();
        filter.changed_since = Some(Utc::now() - Duration::minutes(10));
        let fresh = ctx.store.query_beds(&filter).await?;

        for bed in fresh.into_iter().filter(|b| pressured.contains(&b.ward)) {
            ctx.alerts
                .create(
                    AlertDraft::new(
                        AlertType::BedAvailable,
                        AlertPriority::Medium,
                        format!("Bed {} available", bed.id),
                        format!("Bed {} in {} just became vacant", bed.id, bed.ward),
                    )
                    .department(bed.ward.clone())
                    .related_bed(bed.id.clone())
                    .expires_in(Duration::seconds(ctx.config.bed_available_ttl_secs as i64))
                    .action(
                        RemediationAction::new(
                            "auto_assign",
                            "Notify admissions for auto-assignment",
                            ActionKind::NotifyAdmissions,
                        )
                        .describe("The next queue drain will match a waiting patient")
                        .auto()
                        .with_params(json!({"message": "bed available for assignment"})),
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

/// Surfaces patients expected to discharge inside the planning horizon.
pub struct DischargeMonitor;

#[async_trait]
impl Monitor for DischargeMonitor {
    fn name(&self) -> &'static str {
        "discharge_upcoming"
    }

    async fn check(&self, ctx: &MonitorContext) -> Result<()> {
        let mut filter = PatientFilter::active();
        filter.discharge_within_hours = Some(ctx.config.discharge_horizon_hours);
        let patients = ctx.store.query_patients(&filter).await?;

        for patient in patients {
            let Some(bed) = patient.current_bed.clone() else {
                continue;
            };
            ctx.alerts
                .create(
                    AlertDraft::new(
                        AlertType::DischargeUpcoming,
                        AlertPriority::Medium,
                        format!("Upcoming discharge: {}", patient.id),
                        format!(
                            "Patient {} in bed {bed} expected to discharge within {}h",
                            patient.id, ctx.config.discharge_horizon_hours
                        ),
                    )
                    .related_bed(bed)
                    .related_patient(patient.id.clone())
                    .action(
                        RemediationAction::new(
                            "prepare_discharge",
                            "Start discharge preparation",
                            ActionKind::BeginDischarge,
                        )
                        .with_params(json!({"trigger_template": DISCHARGE_PREPARATION})),
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

/// Beds sitting in cleaning past the overdue threshold get a high alert
/// with an auto-executable expedite trigger.
pub struct CleaningOverdueMonitor;

#[async_trait]
impl Monitor for CleaningOverdueMonitor {
    fn name(&self) -> &'static str {
        "cleaning_overdue"
    }

    async fn check(&self, ctx: &MonitorContext) -> Result<()> {
        let beds = ctx
            .store
            .query_beds(&BedFilter::with_status(BedStatus::Cleaning))
            .await?;
        let now = Utc::now();
        let threshold = ctx.config.cleaning_overdue_hours as f64;

        for bed in beds {
            let hours = bed.hours_in_status(now);
            if hours <= threshold {
                continue;
            }
            ctx.alerts
                .create(
                    AlertDraft::new(
                        AlertType::CleaningOverdue,
                        AlertPriority::High,
                        format!("Cleaning overdue for bed {}", bed.id),
                        format!("Bed {} has been in cleaning for {hours:.1}h", bed.id),
                    )
                    .department(bed.ward.clone())
                    .related_bed(bed.id.clone())
                    .meta("hours_in_cleaning", json!(hours))
                    .action(
                        RemediationAction::new(
                            "expedite",
                            "Expedite this cleaning",
                            ActionKind::NotifyHousekeeping,
                        )
                        .auto()
                        .with_params(json!({"trigger_template": EXPEDITED_CLEANING})),
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::engine::{AlertEngine, AlertFilter};
    use crate::config::{AlertConfig, ScoringConfig};
    use crate::events::EventPublisher;
    use crate::models::{Bed, BedId, BedKind, Patient, PatientId, UrgencyClass, Ward};
    use crate::store::memory::MemoryStore;
    use crate::store::ResourceStore;
    use crate::workflow::ActionRegistry;
    use std::sync::Arc;

    fn context(store: Arc<MemoryStore>) -> MonitorContext {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let store: Arc<dyn ResourceStore> = store;
        let alerts = Arc::new(AlertEngine::new(
            store.clone(),
            Arc::new(EventPublisher::default()),
            Arc::new(ActionRegistry::builtin()),
            AlertConfig::default(),
            ScoringConfig::default(),
            tx,
        ));
        MonitorContext {
            store,
            alerts,
            config: AlertConfig::default(),
        }
    }

    async fn occupied_bed(store: &MemoryStore, id: &str, ward: &str, occupant: &str) {
        let mut bed = Bed::new(BedId::new(id), Ward::new(ward), BedKind::General);
        bed.transition(BedStatus::Occupied, Some(PatientId::new(occupant)))
            .unwrap();
        store.put_bed(bed).await.unwrap();
    }

    #[tokio::test]
    async fn test_capacity_monitor_critical_and_no_beds() {
        let store = Arc::new(MemoryStore::new());
        // Two beds, both occupied: 100% occupancy, zero vacant
        occupied_bed(&store, "G-1", "General", "P1").await;
        occupied_bed(&store, "G-2", "General", "P2").await;

        let ctx = context(store);
        CapacityMonitor.check(&ctx).await.unwrap();

        let active = ctx.alerts.list_active(&AlertFilter::default());
        assert!(active
            .iter()
            .any(|a| a.alert_type == AlertType::CapacityCritical));
        assert!(active
            .iter()
            .any(|a| a.alert_type == AlertType::NoBedsAvailable));
    }

    #[tokio::test]
    async fn test_capacity_monitor_quiet_below_threshold() {
        let store = Arc::new(MemoryStore::new());
        occupied_bed(&store, "G-1", "General", "P1").await;
        store
            .put_bed(Bed::new(BedId::new("G-2"), Ward::new("General"), BedKind::General))
            .await
            .unwrap();

        let ctx = context(store);
        CapacityMonitor.check(&ctx).await.unwrap();
        assert_eq!(ctx.alerts.active_count(), 0);
    }

    #[tokio::test]
    async fn test_bed_availability_flags_fresh_vacancy_under_pressure() {
        let store = Arc::new(MemoryStore::new());
        // 80%+ ward pressure: 4 occupied, 1 freshly vacant
        for i in 0..4 {
            occupied_bed(&store, &format!("G-{i}"), "General", &format!("P{i}")).await;
        }
        store
            .put_bed(Bed::new(BedId::new("G-9"), Ward::new("General"), BedKind::General))
            .await
            .unwrap();

        let ctx = context(store);
        BedAvailabilityMonitor.check(&ctx).await.unwrap();

        let active = ctx.alerts.list_active(&AlertFilter::default());
        let bed_alert = active
            .iter()
            .find(|a| a.alert_type == AlertType::BedAvailable)
            .expect("bed available alert");
        assert_eq!(bed_alert.related_bed, Some(BedId::new("G-9")));
        assert!(bed_alert.expires_at.is_some());
        assert!(bed_alert.actions.iter().any(|a| a.auto_executable));
    }

    #[tokio::test]
    async fn test_discharge_monitor_flags_patients_in_window() {
        let store = Arc::new(MemoryStore::new());
        occupied_bed(&store, "G-1", "General", "P1").await;
        let mut patient = Patient::new(PatientId::new("P1"), UrgencyClass::Medium);
        patient.current_bed = Some(BedId::new("G-1"));
        patient.expected_discharge = Some(Utc::now() + Duration::hours(1));
        store.put_patient(patient).await.unwrap();

        let ctx = context(store);
        DischargeMonitor.check(&ctx).await.unwrap();

        let active = ctx.alerts.list_active(&AlertFilter::default());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::DischargeUpcoming);
        assert_eq!(active[0].related_patient, Some(PatientId::new("P1")));
    }

    #[tokio::test]
    async fn test_cleaning_overdue_ignores_recent_cleanings() {
        let store = Arc::new(MemoryStore::new());
        let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
        bed.transition(BedStatus::Cleaning, None).unwrap();
        store.put_bed(bed).await.unwrap();

        let ctx = context(store);
        CleaningOverdueMonitor.check(&ctx).await.unwrap();
        assert_eq!(ctx.alerts.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cleaning_overdue_alerts_with_expedite_action() {
        let store = Arc::new(MemoryStore::new());
        let mut bed = Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General);
        bed.transition(BedStatus::Cleaning, None).unwrap();
        bed.last_status_change = Utc::now() - Duration::hours(3);
        store.put_bed(bed).await.unwrap();

        let ctx = context(store);
        CleaningOverdueMonitor.check(&ctx).await.unwrap();

        let active = ctx.alerts.list_active(&AlertFilter::default());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::CleaningOverdue);
        assert!(active[0]
            .actions
            .iter()
            .any(|a| a.id == "expedite" && a.auto_executable));
    }
}
