//! # Wardflow Core
//!
//! Autonomous orchestration core for hospital bed operations.
//!
//! The engine closes the loop between demand and capacity: assignment
//! requests enter a priority queue, a multi-criteria scorer matches them
//! against the vacant bed pool, optimistic compare-and-swap commits the
//! winner, and template-driven workflows carry out the operational
//! follow-through (reservation, turnover, discharge). Monitors watch
//! occupancy and bed states, raise deduplicated alerts, and feed
//! remediation back into the workflow executor; a task scheduler drives
//! the whole cycle on fixed intervals.
//!
//! ## Architecture
//!
//! - **models** - beds, patients, requests, and append-only history
//! - **store** - the [`store::ResourceStore`] trait with an in-memory
//!   implementation; compare-and-swap is the one atomic primitive
//! - **scoring** - weighted five-criterion bed match scorer
//! - **assignment** - priority queue, escalation, and commit path
//! - **workflow** - DAG templates, step actions, and the executor
//! - **alerts** - deduplicated alert lifecycle, monitors, remediation
//! - **scheduler** - interval job loop with backoff and job isolation
//! - **system** - [`WardflowSystem`], the assembled engine
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wardflow_core::{WardflowConfig, WardflowSystem};
//!
//! #[tokio::main]
//! async fn main() -> wardflow_core::Result<()> {
//!     wardflow_core::init_logging();
//!     let system = Arc::new(WardflowSystem::new(WardflowConfig::default())?);
//!     system.start();
//!     // ... provision beds, submit requests ...
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod assignment;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod system;
pub mod workflow;

pub use config::WardflowConfig;
pub use error::{Result, WardflowError};
pub use logging::init_logging;
pub use system::WardflowSystem;

pub use alerts::{Alert, AlertEngine, AlertFilter, AlertId, AlertPriority, AlertStatus, AlertType};
pub use assignment::{AssignmentOutcome, AssignmentQueue, QueueMetrics, QueueStatus};
pub use models::{
    AssignmentRequest, Bed, BedId, BedKind, BedStatus, Patient, PatientId, Priority,
    RequirementSet, UrgencyClass, Ward,
};
pub use scheduler::{Scheduler, SchedulerHealth};
pub use scoring::BedMatchScore;
pub use store::{BedFilter, PatientFilter, ResourceStore, StoreError};
pub use workflow::{WorkflowExecutor, WorkflowId, WorkflowState, WorkflowStatus};
