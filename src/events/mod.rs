//! # Event System
//!
//! Fire-and-forget notification sink for lifecycle events. Delivery is
//! at-most-once and best-effort: the core never blocks on subscriber
//! processing and never retries.

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
