//! Compute-control API trait and types.
//!
//! The compute platform is the source of truth for which execution units
//! exist and which tasks are running. Pools only cache what they need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;

/// App state reported by the platform for a running unit.
pub const STATE_STARTED: &str = "STARTED";

/// A pre-provisioned execution unit or task template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContainer {
    pub guid: String,
    pub name: String,
    /// API path of the unit, used for environment updates.
    pub url: String,
    pub state: String,
    /// Template name used to match `Build::container_name`.
    pub container_name: Option<String>,
    /// Command the template runs; task commands are built from it.
    pub command: Option<String>,
}

/// Specification of a one-off task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub command: String,
    pub memory_in_mb: u64,
    pub disk_in_mb: u64,
    /// Task-type label used to find this pool's tasks again.
    pub label: String,
}

/// A task known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub guid: String,
    pub name: String,
    pub state: String,
    pub memory_in_mb: u64,
}

/// Summary of the fixed container roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContainersState {
    pub expected: usize,
    pub found: usize,
    pub started: usize,
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Obtain a valid access token. Used by the healthcheck.
    async fn access_token(&self) -> Result<String>;

    /// List the fixed roster of build containers.
    async fn fetch_build_containers(&self) -> Result<Vec<BuildContainer>>;

    /// List task templates carrying the given type label.
    async fn fetch_build_containers_by_label(&self, label: &str) -> Result<Vec<BuildContainer>>;

    /// Replace a container's environment and restage it.
    async fn update_build_container(
        &self,
        container: &BuildContainer,
        environment: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// List pending and running tasks carrying the given type label.
    async fn fetch_active_tasks(&self, label: &str) -> Result<Vec<Task>>;

    /// Submit a task against a template.
    async fn start_task(&self, container: &BuildContainer, spec: &TaskSpec) -> Result<Task>;

    /// Request cancellation of a task.
    async fn stop_task(&self, task_guid: &str) -> Result<()>;

    /// Check the roster against the expected size and instance health.
    /// Problems are reported as `Error::Unhealthy`.
    async fn build_containers_state(&self, expected: usize) -> Result<BuildContainersState>;
}
