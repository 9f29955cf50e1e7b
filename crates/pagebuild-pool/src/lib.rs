//! Builder pool strategies.
//!
//! Provides the two `BuilderPool` implementations:
//! - `ContainerPool`: fixed roster of build containers, one build each
//! - `TaskPool`: one task per build under a memory ceiling
//!
//! Both give every dispatched build a `BuildTimer` that reclaims it if no
//! explicit stop arrives first.

pub mod container;
pub mod task;
pub mod timeout;

pub use container::ContainerPool;
pub use task::TaskPool;
pub use timeout::{BuildTimer, TIMEOUT_MESSAGE, report_timeout};
