//! # Assignment Queue
//!
//! Priority-ordered intake for bed requests. Requests are drained in
//! `(priority, arrival)` order; each head request is scored against the
//! vacant pool and committed with a compare-and-swap so two drains
//! racing for one bed cannot both win. Unmatched urgent requests
//! escalate into alerts and expedite workflows; unmatched routine
//! requests get one priority bump and then a second, final miss.

pub mod queue;

pub use queue::{
    AssignmentOutcome, AssignmentQueue, AssignmentRecord, QueueMetrics, QueueStatus,
};
