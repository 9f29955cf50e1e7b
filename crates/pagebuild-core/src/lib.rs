//! Core domain types and traits for the pagebuild scheduler.
//!
//! This crate contains:
//! - The `Build` entity and its identifier
//! - The `BuilderPool` admission/dispatch trait
//! - The `QueueSource` trait consumed by the scheduler loop
//! - The `ComputeApi` and `StatusReporter` traits for external collaborators

pub mod build;
pub mod compute;
pub mod error;
pub mod id;
pub mod pool;
pub mod queue;
pub mod status;

pub use build::{Build, BuildPayload, ContainerSize, EnvVar};
pub use error::{Error, Result};
pub use id::BuildId;
pub use pool::BuilderPool;
pub use queue::{QueueMessage, QueueSource};
pub use status::{BuildStatus, StatusReporter};
