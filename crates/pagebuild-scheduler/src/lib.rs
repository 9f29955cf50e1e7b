//! Build scheduling for pagebuild.
//!
//! Polls every queue source, admits builds against the configured
//! `BuilderPool` and acknowledges messages only once their build started.
//! Unadmitted messages stay on the queue; redelivery is the backpressure.

pub mod queue;
pub mod scheduler;

pub use queue::{MemoryQueue, RedisQueue, connect_sources};
pub use scheduler::{Evaluation, Scheduler};
