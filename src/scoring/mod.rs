//! # Bed Match Scorer
//!
//! Pure multi-criteria scoring for (request, candidate bed) pairs. No
//! state, no I/O: callers pass the candidate, the patient profile, the
//! requirement set, and the clock. Each criterion starts at a neutral
//! baseline of 50, is adjusted by a fixed rule table keyed on condition
//! tags vs. bed class, is clamped to [0, 100], and the five results are
//! combined through the configured weight vector. Confidence reflects
//! how consistent the per-criterion scores are with each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::ScoringConfig;
use crate::models::{Bed, BedKind, BedStatus, ConditionTag, MonitoringLevel, Patient, RequirementSet};

const BASELINE: f64 = 50.0;

/// The five scoring criteria, weighted per [`ScoringConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    MedicalFit,
    PreferenceFit,
    CostEfficiency,
    WorkflowEfficiency,
    InfectionControl,
}

impl Criterion {
    pub const ALL: [Criterion; 5] = [
        Criterion::MedicalFit,
        Criterion::PreferenceFit,
        Criterion::CostEfficiency,
        Criterion::WorkflowEfficiency,
        Criterion::InfectionControl,
    ];

    fn weight(&self, config: &ScoringConfig) -> f64 {
        match self {
            Criterion::MedicalFit => config.weight_medical_fit,
            Criterion::PreferenceFit => config.weight_preference_fit,
            Criterion::CostEfficiency => config.weight_cost_efficiency,
            Criterion::WorkflowEfficiency => config.weight_workflow_efficiency,
            Criterion::InfectionControl => config.weight_infection_control,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Criterion::MedicalFit => "medical_fit",
            Criterion::PreferenceFit => "preference_fit",
            Criterion::CostEfficiency => "cost_efficiency",
            Criterion::WorkflowEfficiency => "workflow_efficiency",
            Criterion::InfectionControl => "infection_control",
        };
        write!(f, "{s}")
    }
}

/// Ephemeral score for one (request, candidate) pair. Used once to rank
/// candidates, then discarded; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedMatchScore {
    pub bed_id: crate::models::BedId,
    pub total: f64,
    pub per_criterion: BTreeMap<Criterion, f64>,
    pub confidence: f64,
    pub rationale: Vec<String>,
    pub issues: Vec<String>,
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

fn score_medical_fit(bed: &Bed, patient: &Patient, requirements: &RequirementSet) -> f64 {
    let mut score = BASELINE;

    // Critical care matching
    if patient.has_tag(ConditionTag::Critical) {
        score += match bed.kind {
            BedKind::Icu => 40.0,
            BedKind::Emergency | BedKind::StepDown => 20.0,
            _ => -30.0,
        };
    } else if patient.has_tag(ConditionTag::Trauma) {
        score += match bed.kind {
            BedKind::Emergency => 35.0,
            BedKind::Icu => 25.0,
            _ => -20.0,
        };
    } else if patient.has_tag(ConditionTag::Surgical) || patient.has_tag(ConditionTag::PostOp) {
        score += match bed.kind {
            BedKind::Surgical | BedKind::General => 30.0,
            BedKind::Icu => 15.0,
            _ => -10.0,
        };
    }

    if patient.has_tag(ConditionTag::Pediatric) {
        score += if bed.kind == BedKind::Pediatric { 25.0 } else { -15.0 };
    }
    if patient.has_tag(ConditionTag::Maternity) {
        score += if bed.kind == BedKind::Maternity { 30.0 } else { -25.0 };
    }

    if requirements.isolation_required {
        score += if bed.isolation_capable { 20.0 } else { -30.0 };
    }
    if requirements.monitoring_level == MonitoringLevel::High {
        score += if bed.kind.is_high_acuity() { 15.0 } else { -10.0 };
    }

    clamp(score)
}

fn score_preference_fit(bed: &Bed, requirements: &RequirementSet) -> f64 {
    let mut score = BASELINE;

    if requirements.private_room_preferred {
        score += if bed.private_room { 30.0 } else { -20.0 };
    }
    if let Some(ward) = &requirements.preferred_ward {
        if &bed.ward == ward {
            score += 25.0;
        }
    }

    clamp(score)
}

fn score_cost_efficiency(bed: &Bed, patient: &Patient) -> f64 {
    let mut score = BASELINE;

    // Private rooms and ICU beds carry cost only justified by need
    if bed.private_room {
        score -= 15.0;
    } else {
        score += 10.0;
    }
    if bed.kind == BedKind::Icu {
        score += if patient.has_tag(ConditionTag::Critical) { 10.0 } else { -20.0 };
    } else if bed.kind == BedKind::General {
        score += 15.0;
    }

    clamp(score)
}

fn score_workflow_efficiency(bed: &Bed, patient: &Patient, now: DateTime<Utc>) -> f64 {
    let mut score = BASELINE;

    // Ward specialization keeps care pathways short
    let specialization = [
        (ConditionTag::Cardiac, "Cardiac"),
        (ConditionTag::Neuro, "Neurology"),
        (ConditionTag::Ortho, "Orthopedic"),
    ];
    for (tag, ward) in specialization {
        if patient.has_tag(tag) && bed.ward.as_str().eq_ignore_ascii_case(ward) {
            score += 20.0;
        }
    }

    // Longer-vacant beds are better turnover targets
    score += bed.hours_in_status(now).min(15.0).max(0.0);

    clamp(score)
}

fn score_infection_control(bed: &Bed, patient: &Patient, now: DateTime<Utc>) -> f64 {
    let mut score = BASELINE;

    if patient.has_tag(ConditionTag::Infectious) {
        score += if bed.private_room { 30.0 } else { -40.0 };
    }
    if patient.has_tag(ConditionTag::Immunocompromised) {
        score += if bed.private_room { 25.0 } else { -20.0 };
    }

    // Freshly turned-over beds score better; long-idle beds need recheck
    if bed.status == BedStatus::Vacant {
        let hours = bed.hours_in_status(now);
        if hours < 2.0 {
            score += 15.0;
        } else if hours > 24.0 {
            score -= 10.0;
        }
    }

    clamp(score)
}

/// Score a single candidate bed for a patient and requirement set.
pub fn score(
    bed: &Bed,
    patient: &Patient,
    requirements: &RequirementSet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> BedMatchScore {
    let mut per_criterion = BTreeMap::new();
    per_criterion.insert(
        Criterion::MedicalFit,
        score_medical_fit(bed, patient, requirements),
    );
    per_criterion.insert(
        Criterion::PreferenceFit,
        score_preference_fit(bed, requirements),
    );
    per_criterion.insert(
        Criterion::CostEfficiency,
        score_cost_efficiency(bed, patient),
    );
    per_criterion.insert(
        Criterion::WorkflowEfficiency,
        score_workflow_efficiency(bed, patient, now),
    );
    per_criterion.insert(
        Criterion::InfectionControl,
        score_infection_control(bed, patient, now),
    );

    let total: f64 = per_criterion
        .iter()
        .map(|(criterion, value)| value * criterion.weight(config))
        .sum();
    let total = clamp(total);

    let mut rationale = Vec::new();
    let mut issues = Vec::new();
    let medical = per_criterion[&Criterion::MedicalFit];
    let infection = per_criterion[&Criterion::InfectionControl];
    let workflow = per_criterion[&Criterion::WorkflowEfficiency];
    let cost = per_criterion[&Criterion::CostEfficiency];
    let preference = per_criterion[&Criterion::PreferenceFit];

    if medical > 80.0 {
        rationale.push(format!("Excellent medical fit for {} bed", bed.kind));
    }
    if preference > 70.0 {
        rationale.push("Matches patient preferences".to_string());
    }
    if workflow > 75.0 {
        rationale.push("Optimizes workflow efficiency".to_string());
    }
    if medical < 50.0 {
        issues.push("May not fully meet medical requirements".to_string());
    }
    if infection < 60.0 {
        issues.push("Infection control considerations".to_string());
    }
    if cost < 40.0 {
        issues.push("Higher cost option".to_string());
    }

    // Consistent per-criterion scores mean a trustworthy total
    let max = per_criterion.values().cloned().fold(f64::MIN, f64::max);
    let min = per_criterion.values().cloned().fold(f64::MAX, f64::min);
    let confidence = ((total / 100.0) * (1.0 - (max - min) / 100.0)).clamp(0.0, 1.0);

    BedMatchScore {
        bed_id: bed.id.clone(),
        total,
        per_criterion,
        confidence,
        rationale,
        issues,
    }
}

/// Rank candidates and return the best match, or `None` when the
/// candidate set is empty. An empty set is a normal outcome, not an
/// error.
pub fn rank(
    candidates: &[Bed],
    patient: &Patient,
    requirements: &RequirementSet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Option<BedMatchScore> {
    candidates
        .iter()
        .map(|bed| score(bed, patient, requirements, config, now))
        .max_by(|a, b| a.total.partial_cmp(&b.total).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BedId, PatientId, UrgencyClass, Ward};

    fn icu_bed() -> Bed {
        Bed::new(BedId::new("ICU-1"), Ward::new("ICU"), BedKind::Icu)
    }

    fn general_bed() -> Bed {
        Bed::new(BedId::new("G-1"), Ward::new("General"), BedKind::General)
    }

    fn critical_patient() -> Patient {
        Patient::new(PatientId::new("P1"), UrgencyClass::Emergency)
            .with_tags(vec![ConditionTag::Critical])
    }

    #[test]
    fn test_critical_patient_prefers_icu() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let patient = critical_patient();
        let reqs = RequirementSet::default();

        let icu = score(&icu_bed(), &patient, &reqs, &cfg, now);
        let general = score(&general_bed(), &patient, &reqs, &cfg, now);
        assert!(icu.total > general.total);
        assert_eq!(icu.per_criterion[&Criterion::MedicalFit], 90.0);
        assert_eq!(general.per_criterion[&Criterion::MedicalFit], 20.0);
    }

    #[test]
    fn test_scores_clamped_to_range() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let patient = Patient::new(PatientId::new("P1"), UrgencyClass::Medium).with_tags(vec![
            ConditionTag::Infectious,
            ConditionTag::Immunocompromised,
            ConditionTag::Maternity,
        ]);
        let shared = general_bed();
        let result = score(&shared, &patient, &RequirementSet::isolation(), &cfg, now);

        assert!(result.total >= 0.0 && result.total <= 100.0);
        for value in result.per_criterion.values() {
            assert!((0.0..=100.0).contains(value));
        }
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn test_isolation_requirement_flags_issue() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let patient = Patient::new(PatientId::new("P1"), UrgencyClass::High)
            .with_tags(vec![ConditionTag::Infectious]);
        let result = score(&general_bed(), &patient, &RequirementSet::isolation(), &cfg, now);

        assert!(result
            .issues
            .iter()
            .any(|i| i.contains("Infection control")));
    }

    #[test]
    fn test_dispersed_scores_lower_confidence() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let reqs = RequirementSet::default();

        // ICU bed for a critical patient: high medical, low cost score
        let dispersed = score(&icu_bed(), &critical_patient(), &reqs, &cfg, now);
        // General bed for an untagged patient: everything near baseline
        let flat_patient = Patient::new(PatientId::new("P2"), UrgencyClass::Low);
        let flat = score(&general_bed(), &flat_patient, &reqs, &cfg, now);

        let dispersed_spread = dispersed
            .per_criterion
            .values()
            .cloned()
            .fold(f64::MIN, f64::max)
            - dispersed
                .per_criterion
                .values()
                .cloned()
                .fold(f64::MAX, f64::min);
        let flat_spread = flat.per_criterion.values().cloned().fold(f64::MIN, f64::max)
            - flat.per_criterion.values().cloned().fold(f64::MAX, f64::min);
        assert!(dispersed_spread > flat_spread);
    }

    #[test]
    fn test_rank_empty_candidates_is_none() {
        let cfg = ScoringConfig::default();
        let patient = critical_patient();
        assert!(rank(&[], &patient, &RequirementSet::default(), &cfg, Utc::now()).is_none());
    }

    #[test]
    fn test_rank_picks_maximum() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let patient = critical_patient();
        let beds = vec![general_bed(), icu_bed()];
        let best = rank(&beds, &patient, &RequirementSet::default(), &cfg, now).unwrap();
        assert_eq!(best.bed_id, BedId::new("ICU-1"));
    }
}
