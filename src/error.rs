//! Crate-level error taxonomy. Per-module error enums (store, workflow,
//! alerts, scheduler) convert into this type at the component boundary.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum WardflowError {
    /// Malformed request; rejected immediately, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Alert error: {0}")]
    Alert(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WardflowError {
    /// Transient errors may be retried within a component's backoff
    /// budget; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}

pub type Result<T> = std::result::Result<T, WardflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WardflowError::Store(StoreError::Unavailable("timeout".into())).is_transient());
        assert!(!WardflowError::Validation("bad id".into()).is_transient());
        assert!(!WardflowError::Store(StoreError::NotFound("bed".into())).is_transient());
    }
}
