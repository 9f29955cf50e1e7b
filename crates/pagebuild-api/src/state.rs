//! Application state.

use pagebuild_core::compute::ComputeApi;
use pagebuild_core::{BuilderPool, QueueSource};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<dyn BuilderPool>,
    pub sources: Vec<Arc<dyn QueueSource>>,
    pub compute: Arc<dyn ComputeApi>,
}

impl AppState {
    pub fn new(
        pool: Arc<dyn BuilderPool>,
        sources: Vec<Arc<dyn QueueSource>>,
        compute: Arc<dyn ComputeApi>,
    ) -> Self {
        Self {
            pool,
            sources,
            compute,
        }
    }
}
