//! Alert domain types and the dedup key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::models::{BedId, PatientId, Ward};
use crate::workflow::ActionKind;

pub type AlertId = Uuid;

/// Kinds of operational alerts the engine raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CapacityCritical,
    CapacityHigh,
    NoBedsAvailable,
    BedAvailable,
    DischargeUpcoming,
    CleaningOverdue,
    WorkflowFailed,
    AssignmentFailed,
    MonitorDisabled,
    EngineDegraded,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CapacityCritical => "capacity_critical",
            Self::CapacityHigh => "capacity_high",
            Self::NoBedsAvailable => "no_beds_available",
            Self::BedAvailable => "bed_available",
            Self::DischargeUpcoming => "discharge_upcoming",
            Self::CleaningOverdue => "cleaning_overdue",
            Self::WorkflowFailed => "workflow_failed",
            Self::AssignmentFailed => "assignment_failed",
            Self::MonitorDisabled => "monitor_disabled",
            Self::EngineDegraded => "engine_degraded",
        };
        write!(f, "{s}")
    }
}

/// Alert severity; derive order makes `Critical` the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    InProgress,
    Resolved,
}

/// Identity under which repeated triggers collapse into one alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub alert_type: AlertType,
    pub department: Option<Ward>,
    pub related_bed: Option<BedId>,
}

/// An operator- or engine-executable response attached to an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: ActionKind,
    pub auto_executable: bool,
    pub requires_approval: bool,
    pub params: Value,
}

impl RemediationAction {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind,
            auto_executable: false,
            requires_approval: false,
            params: Value::Null,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto_executable = true;
        self
    }

    pub fn gated(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// A deduplicated operational alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub department: Option<Ward>,
    pub related_bed: Option<BedId>,
    pub related_patient: Option<PatientId>,
    pub metadata: serde_json::Map<String, Value>,
    pub actions: Vec<RemediationAction>,
    /// Action ids already executed, skipped by the auto-exec sweep.
    pub executed_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_by: Option<String>,
    pub resolution_reason: Option<String>,
}

impl Alert {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            alert_type: self.alert_type,
            department: self.department.clone(),
            related_bed: self.related_bed.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// Builder for new alerts. `AlertEngine::create` turns a draft into an
/// active alert or merges it into an existing one with the same key.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub department: Option<Ward>,
    pub related_bed: Option<BedId>,
    pub related_patient: Option<PatientId>,
    pub metadata: serde_json::Map<String, Value>,
    pub actions: Vec<RemediationAction>,
    pub ttl: Option<Duration>,
}

impl AlertDraft {
    pub fn new(
        alert_type: AlertType,
        priority: AlertPriority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            priority,
            title: title.into(),
            message: message.into(),
            department: None,
            related_bed: None,
            related_patient: None,
            metadata: serde_json::Map::new(),
            actions: Vec::new(),
            ttl: None,
        }
    }

    pub fn department(mut self, ward: Ward) -> Self {
        self.department = Some(ward);
        self
    }

    pub fn related_bed(mut self, bed: BedId) -> Self {
        self.related_bed = Some(bed);
        self
    }

    pub fn related_patient(mut self, patient: PatientId) -> Self {
        self.related_patient = Some(patient);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn action(mut self, action: RemediationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            alert_type: self.alert_type,
            department: self.department.clone(),
            related_bed: self.related_bed.clone(),
        }
    }

    pub(crate) fn into_alert(self) -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            alert_type: self.alert_type,
            priority: self.priority,
            status: AlertStatus::Active,
            title: self.title,
            message: self.message,
            department: self.department,
            related_bed: self.related_bed,
            related_patient: self.related_patient,
            metadata: self.metadata,
            actions: self.actions,
            executed_actions: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: self.ttl.map(|t| now + t),
            acknowledged_by: None,
            resolved_by: None,
            resolution_reason: None,
        }
    }
}

/// Record of one remediation action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub alert_id: AlertId,
    pub action_id: String,
    pub executed_by: String,
    pub summary: String,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(AlertPriority::Critical > AlertPriority::High);
        assert!(AlertPriority::High > AlertPriority::Medium);
        assert!(AlertPriority::Medium > AlertPriority::Low);
    }

    #[test]
    fn test_dedup_key_ignores_message() {
        let a = AlertDraft::new(
            AlertType::NoBedsAvailable,
            AlertPriority::Critical,
            "No beds",
            "first trigger",
        )
        .department(Ward::new("ICU"));
        let b = AlertDraft::new(
            AlertType::NoBedsAvailable,
            AlertPriority::High,
            "No beds",
            "second trigger",
        )
        .department(Ward::new("ICU"));
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = AlertDraft::new(
            AlertType::NoBedsAvailable,
            AlertPriority::Critical,
            "No beds",
            "other ward",
        )
        .department(Ward::new("Surgery"));
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_expiry_window() {
        let alert = AlertDraft::new(
            AlertType::BedAvailable,
            AlertPriority::Medium,
            "Bed available",
            "ICU-1 vacated",
        )
        .expires_in(Duration::hours(1))
        .into_alert();
        let now = Utc::now();
        assert!(!alert.is_expired(now));
        assert!(alert.is_expired(now + Duration::hours(2)));
    }
}
