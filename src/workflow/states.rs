//! Step and workflow lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single step within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl StepState {
    /// Whether a dependent step may start because of this step.
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a workflow as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid workflow state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(WorkflowState::Complete.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(!WorkflowState::Running.is_terminal());
        assert!(!WorkflowState::Pending.is_terminal());
    }

    #[test]
    fn test_only_complete_satisfies_dependencies() {
        assert!(StepState::Complete.satisfies_dependencies());
        assert!(!StepState::Failed.satisfies_dependencies());
        assert!(!StepState::Running.satisfies_dependencies());
        assert!(!StepState::Pending.satisfies_dependencies());
    }

    #[test]
    fn test_state_string_round_trip() {
        assert_eq!(WorkflowState::Running.to_string(), "running");
        assert_eq!(
            "cancelled".parse::<WorkflowState>().unwrap(),
            WorkflowState::Cancelled
        );
        assert!("paused".parse::<WorkflowState>().is_err());
    }
}
