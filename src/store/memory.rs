//! In-memory reference implementation of [`ResourceStore`].
//!
//! DashMap gives per-record entry locking, which is exactly the
//! granularity the compare-and-swap contract needs: the read-verify-write
//! of a single bed happens under its entry lock, while unrelated records
//! proceed in parallel.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::models::{
    Bed, BedId, BedStatus, OccupancyRecord, OperationalLogEntry, Patient, PatientId, Ward,
};
use crate::store::{
    BedFilter, PatientFilter, ResourceStore, StoreError, StoreResult, WardCensus,
};

/// DashMap-backed store with append-only history vectors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    beds: DashMap<BedId, Bed>,
    patients: DashMap<PatientId, Patient>,
    occupancy: RwLock<Vec<OccupancyRecord>>,
    ops_log: RwLock<Vec<OperationalLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operational log entries, for tests and health reports.
    pub fn log_len(&self) -> usize {
        self.ops_log.read().len()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_bed(&self, id: &BedId) -> StoreResult<Bed> {
        self.beds
            .get(id)
            .map(|b| b.clone())
            .ok_or_else(|| StoreError::NotFound(format!("bed {id}")))
    }

    async fn query_beds(&self, filter: &BedFilter) -> StoreResult<Vec<Bed>> {
        let mut beds: Vec<Bed> = self
            .beds
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        beds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(beds)
    }

    async fn put_bed(&self, bed: Bed) -> StoreResult<()> {
        self.beds.insert(bed.id.clone(), bed);
        Ok(())
    }

    async fn compare_and_swap_bed(
        &self,
        id: &BedId,
        expected: BedStatus,
        new_status: BedStatus,
        occupant: Option<PatientId>,
    ) -> StoreResult<Bed> {
        let mut entry = self
            .beds
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("bed {id}")))?;

        if entry.status != expected {
            return Err(StoreError::Conflict {
                record: format!("bed {id}"),
                expected: expected.to_string(),
                actual: entry.status.to_string(),
            });
        }

        entry
            .transition(new_status, occupant)
            .map_err(StoreError::InvalidMutation)?;
        Ok(entry.clone())
    }

    async fn get_patient(&self, id: &PatientId) -> StoreResult<Patient> {
        self.patients
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::NotFound(format!("patient {id}")))
    }

    async fn query_patients(&self, filter: &PatientFilter) -> StoreResult<Vec<Patient>> {
        let now = Utc::now();
        let mut patients: Vec<Patient> = self
            .patients
            .iter()
            .filter(|entry| filter.matches(entry.value(), now))
            .map(|entry| entry.value().clone())
            .collect();
        patients.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(patients)
    }

    async fn put_patient(&self, patient: Patient) -> StoreResult<()> {
        self.patients.insert(patient.id.clone(), patient);
        Ok(())
    }

    async fn update_patient(&self, patient: Patient) -> StoreResult<()> {
        if !self.patients.contains_key(&patient.id) {
            return Err(StoreError::NotFound(format!("patient {}", patient.id)));
        }
        self.patients.insert(patient.id.clone(), patient);
        Ok(())
    }

    async fn append_occupancy(&self, record: OccupancyRecord) -> StoreResult<()> {
        self.occupancy.write().push(record);
        Ok(())
    }

    async fn append_log(&self, entry: OperationalLogEntry) -> StoreResult<()> {
        self.ops_log.write().push(entry);
        Ok(())
    }

    async fn occupancy_history(
        &self,
        bed: &BedId,
        limit: usize,
    ) -> StoreResult<Vec<OccupancyRecord>> {
        let occupancy = self.occupancy.read();
        Ok(occupancy
            .iter()
            .rev()
            .filter(|r| &r.bed_id == bed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ward_census(&self) -> StoreResult<HashMap<Ward, WardCensus>> {
        let mut census: HashMap<Ward, WardCensus> = HashMap::new();
        for entry in self.beds.iter() {
            let bed = entry.value();
            let slot = census.entry(bed.ward.clone()).or_default();
            slot.total += 1;
            match bed.status {
                BedStatus::Occupied => slot.occupied += 1,
                BedStatus::Vacant => slot.vacant += 1,
                BedStatus::Cleaning => slot.cleaning += 1,
                _ => {}
            }
        }
        Ok(census)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BedKind, UrgencyClass};
    use std::sync::Arc;

    fn seed_bed(id: &str, ward: &str, kind: BedKind) -> Bed {
        Bed::new(BedId::new(id), Ward::new(ward), kind)
    }

    #[tokio::test]
    async fn test_cas_success_and_conflict() {
        let store = MemoryStore::new();
        store.put_bed(seed_bed("G-1", "General", BedKind::General)).await.unwrap();

        let updated = store
            .compare_and_swap_bed(
                &BedId::new("G-1"),
                BedStatus::Vacant,
                BedStatus::Occupied,
                Some(PatientId::new("P1")),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, BedStatus::Occupied);

        // Second swap against the stale expectation must conflict
        let err = store
            .compare_and_swap_bed(
                &BedId::new("G-1"),
                BedStatus::Vacant,
                BedStatus::Occupied,
                Some(PatientId::new("P2")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let store = Arc::new(MemoryStore::new());
        store.put_bed(seed_bed("G-1", "General", BedKind::General)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_swap_bed(
                        &BedId::new("G-1"),
                        BedStatus::Vacant,
                        BedStatus::Occupied,
                        Some(PatientId::new(format!("P{i}"))),
                    )
                    .await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_ward_census_counts() {
        let store = MemoryStore::new();
        store.put_bed(seed_bed("I-1", "ICU", BedKind::Icu)).await.unwrap();
        store.put_bed(seed_bed("I-2", "ICU", BedKind::Icu)).await.unwrap();
        store
            .compare_and_swap_bed(
                &BedId::new("I-1"),
                BedStatus::Vacant,
                BedStatus::Occupied,
                Some(PatientId::new("P1")),
            )
            .await
            .unwrap();

        let census = store.ward_census().await.unwrap();
        let icu = &census[&Ward::new("ICU")];
        assert_eq!(icu.total, 2);
        assert_eq!(icu.occupied, 1);
        assert_eq!(icu.vacant, 1);
        assert!((icu.occupancy_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = MemoryStore::new();
        store.put_bed(seed_bed("I-1", "ICU", BedKind::Icu)).await.unwrap();
        store.put_bed(seed_bed("G-1", "General", BedKind::General)).await.unwrap();

        let vacant = store.query_beds(&BedFilter::vacant()).await.unwrap();
        assert_eq!(vacant.len(), 2);

        let icu_only = store
            .query_beds(&BedFilter {
                ward: Some(Ward::new("ICU")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(icu_only.len(), 1);
        assert_eq!(icu_only[0].id, BedId::new("I-1"));
    }

    #[tokio::test]
    async fn test_patient_archive_not_delete() {
        let store = MemoryStore::new();
        let mut p = Patient::new(PatientId::new("P1"), UrgencyClass::Low);
        store.put_patient(p.clone()).await.unwrap();

        p.archived = true;
        store.update_patient(p).await.unwrap();

        let active = store.query_patients(&PatientFilter::active()).await.unwrap();
        assert!(active.is_empty());
        // Record still present
        assert!(store.get_patient(&PatientId::new("P1")).await.is_ok());
    }
}
