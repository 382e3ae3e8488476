//! # Workflow Execution
//!
//! DAG-based workflow execution for bed operations. Templates instantiate
//! into validated step graphs; the executor scans for ready steps, runs
//! them concurrently under per-step timeouts, retries in place, and fails
//! the whole workflow on any exhausted step. Dependency cycles are
//! rejected at creation, before anything runs.

pub mod actions;
pub mod executor;
pub mod states;
pub mod templates;
pub mod types;

pub use actions::{
    Action, ActionContext, ActionError, ActionKind, ActionOutcome, ActionRegistry,
};
pub use executor::{WorkflowExecutor, WorkflowTrigger};
pub use states::{StepState, WorkflowState};
pub use types::{StepSpec, Workflow, WorkflowId, WorkflowStatus, WorkflowStep};

use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Workflow validation failed: {0}")]
    Validation(String),

    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Workflow is already terminal: {0}")]
    AlreadyTerminal(WorkflowId),
}

impl From<WorkflowError> for crate::error::WardflowError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(msg) => Self::Validation(msg),
            WorkflowError::UnknownTemplate(_) => Self::Validation(err.to_string()),
            other => Self::Workflow(other.to_string()),
        }
    }
}

/// Cancellation side held by the executor.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation token polled by actions around long waits.
/// Cancellation is best-effort: a step that has already produced side
/// effects is treated as a lost update for the monitor sweeps to find.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is signalled (or the handle is dropped).
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                break;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_token_observes_signal() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wait_returns_after_handle_drop() {
        let (handle, mut token) = cancel_pair();
        drop(handle);
        // Must not hang once the sender side is gone
        token.cancelled().await;
    }
}
