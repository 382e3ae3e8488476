//! Workflow and step definitions, with fail-fast dependency validation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::constants::system::MAX_WORKFLOW_STEPS;
use crate::models::Priority;
use crate::workflow::actions::ActionKind;
use crate::workflow::states::{StepState, WorkflowState};
use crate::workflow::WorkflowError;

pub type WorkflowId = Uuid;

/// Static definition of one step inside a template.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Unique within the workflow, e.g. `"reserve_bed"`.
    pub id: String,
    pub action: ActionKind,
    pub params: Value,
    pub depends_on: Vec<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, action: ActionKind) -> Self {
        Self {
            id: id.into(),
            action,
            params: Value::Null,
            depends_on: Vec::new(),
            timeout: Duration::from_secs(1800),
            max_retries: 3,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Runtime state of one step.
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub spec: StepSpec,
    pub state: StepState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub last_error: Option<String>,
}

impl WorkflowStep {
    fn new(spec: StepSpec) -> Self {
        Self {
            spec,
            state: StepState::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            output: None,
            last_error: None,
        }
    }
}

/// Shared scratch space for passing values between steps of one workflow.
pub type Scratch = Arc<Mutex<serde_json::Map<String, Value>>>;

/// A running (or finished) workflow instance.
#[derive(Debug)]
pub struct Workflow {
    pub id: WorkflowId,
    pub template: String,
    pub priority: Priority,
    pub state: WorkflowState,
    pub steps: Vec<WorkflowStep>,
    pub params: Value,
    pub scratch: Scratch,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Workflow {
    /// Build a workflow from a validated step list. Rejects empty, oversized,
    /// duplicated, dangling, or cyclic step graphs before anything runs.
    pub fn new(
        template: impl Into<String>,
        priority: Priority,
        specs: Vec<StepSpec>,
        params: Value,
    ) -> Result<Self, WorkflowError> {
        validate_dag(&specs)?;
        Ok(Self {
            id: Uuid::new_v4(),
            template: template.into(),
            priority,
            state: WorkflowState::Pending,
            steps: specs.into_iter().map(WorkflowStep::new).collect(),
            params,
            scratch: Arc::new(Mutex::new(serde_json::Map::new())),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
        })
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.spec.id == id)
    }

    /// Indices of steps whose dependencies are all complete and which have
    /// not run to a terminal state or started yet.
    pub fn ready_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| {
                step.state == StepState::Pending
                    && step.spec.depends_on.iter().all(|dep| {
                        self.step(dep)
                            .map(|d| d.state.satisfies_dependencies())
                            .unwrap_or(false)
                    })
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_pending_steps(&self) -> bool {
        self.steps.iter().any(|s| s.state == StepState::Pending)
    }

    pub fn all_steps_complete(&self) -> bool {
        self.steps.iter().all(|s| s.state == StepState::Complete)
    }

    /// Steps done vs total, for status reporting.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.state == StepState::Complete)
            .count();
        (done, self.steps.len())
    }
}

/// Compact read-only view of a workflow, safe to hand out.
#[derive(Debug, Clone)]
pub struct WorkflowStatus {
    pub id: WorkflowId,
    pub template: String,
    pub priority: Priority,
    pub state: WorkflowState,
    pub steps_complete: usize,
    pub steps_total: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl From<&Workflow> for WorkflowStatus {
    fn from(wf: &Workflow) -> Self {
        let (done, total) = wf.progress();
        Self {
            id: wf.id,
            template: wf.template.clone(),
            priority: wf.priority,
            state: wf.state,
            steps_complete: done,
            steps_total: total,
            created_at: wf.created_at,
            completed_at: wf.completed_at,
            failure_reason: wf.failure_reason.clone(),
        }
    }
}

/// Kahn's algorithm over the step graph. Any node left unvisited after the
/// queue drains sits on a cycle.
fn validate_dag(specs: &[StepSpec]) -> Result<(), WorkflowError> {
    if specs.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }
    if specs.len() > MAX_WORKFLOW_STEPS {
        return Err(WorkflowError::Validation(format!(
            "workflow has {} steps, limit is {MAX_WORKFLOW_STEPS}",
            specs.len()
        )));
    }

    let mut ids = HashSet::new();
    for spec in specs {
        if !ids.insert(spec.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step id: {}",
                spec.id
            )));
        }
    }
    for spec in specs {
        for dep in &spec.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "step {} depends on unknown step {dep}",
                    spec.id
                )));
            }
            if dep == &spec.id {
                return Err(WorkflowError::Validation(format!(
                    "step {} depends on itself",
                    spec.id
                )));
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = specs
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for spec in specs {
        for dep in &spec.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(spec.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            let degree = in_degree
                .get_mut(dependent)
                .ok_or_else(|| WorkflowError::Validation("inconsistent step graph".to_string()))?;
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if visited != specs.len() {
        return Err(WorkflowError::Validation(
            "workflow dependency graph contains a cycle".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: &str, deps: &[&str]) -> StepSpec {
        StepSpec::new(id, ActionKind::NotifyStaff).after(deps)
    }

    #[test]
    fn test_linear_chain_validates() {
        let wf = Workflow::new(
            "test",
            Priority::Medium,
            vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])],
            json!({}),
        )
        .unwrap();
        assert_eq!(wf.state, WorkflowState::Pending);
        assert_eq!(wf.ready_steps(), vec![0]);
    }

    #[test]
    fn test_cycle_rejected_at_creation() {
        let err = Workflow::new(
            "test",
            Priority::Medium,
            vec![spec("a", &["b"]), spec("b", &["a"])],
            json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_self_dependency_rejected() {
        assert!(Workflow::new("test", Priority::Low, vec![spec("a", &["a"])], json!({})).is_err());
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let err = Workflow::new(
            "test",
            Priority::Medium,
            vec![spec("a", &["missing"])],
            json!({}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        assert!(Workflow::new(
            "test",
            Priority::Medium,
            vec![spec("a", &[]), spec("a", &[])],
            json!({}),
        )
        .is_err());
    }

    #[test]
    fn test_empty_workflow_rejected() {
        assert!(Workflow::new("test", Priority::Medium, vec![], json!({})).is_err());
    }

    #[test]
    fn test_diamond_ready_order() {
        let mut wf = Workflow::new(
            "test",
            Priority::Medium,
            vec![
                spec("root", &[]),
                spec("left", &["root"]),
                spec("right", &["root"]),
                spec("join", &["left", "right"]),
            ],
            json!({}),
        )
        .unwrap();

        assert_eq!(wf.ready_steps(), vec![0]);
        wf.steps[0].state = StepState::Complete;
        assert_eq!(wf.ready_steps(), vec![1, 2]);
        wf.steps[1].state = StepState::Complete;
        // Join waits for both branches
        assert_eq!(wf.ready_steps(), vec![2]);
        wf.steps[2].state = StepState::Complete;
        assert_eq!(wf.ready_steps(), vec![3]);
    }
}
