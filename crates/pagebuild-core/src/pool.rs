//! Builder pool trait.
//!
//! A pool decides whether a build may be dispatched and, if so, runs it on
//! an execution unit it manages. Implementations own every piece of
//! scheduling state and key it by `BuildId`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{Build, BuildId, Result};

#[async_trait]
pub trait BuilderPool: Send + Sync {
    /// Name of this pool strategy.
    fn name(&self) -> &'static str;

    /// Start background work. Errors here are fatal to the pool.
    async fn start(&self) -> Result<()>;

    /// Stop background work. In-flight builds are left alone.
    async fn stop(&self);

    /// Admission check. `Ok(false)` is backpressure, not a failure.
    async fn can_start_build(&self, build: &Build) -> Result<bool>;

    /// Dispatch an admitted build. On error no local state is left behind.
    async fn start_build(&self, build: Arc<Build>) -> Result<()>;

    /// Release a build and cancel its timer. Unknown ids are ignored.
    async fn stop_build(&self, build_id: &BuildId);

    /// Snapshot of the pool's external inventory for the healthcheck.
    async fn health(&self) -> Result<serde_json::Value>;
}
