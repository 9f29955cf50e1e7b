//! Budget-based builder pool.
//!
//! Every build runs as a short-lived task started from a labelled template.
//! Admission sums the memory of the tasks the platform reports as active and
//! compares it against a configured ceiling.

use async_trait::async_trait;
use pagebuild_config::{TaskPoolSettings, TaskSizing};
use pagebuild_core::compute::{BuildContainer, ComputeApi, TaskSpec};
use pagebuild_core::{Build, BuildId, BuildStatus, BuilderPool, Error, Result, StatusReporter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::timeout::{BuildTimer, report_timeout};

#[derive(Debug)]
struct ActiveTask {
    task_guid: String,
    timer: BuildTimer,
}

#[derive(Debug, Default)]
struct TaskState {
    builds: HashMap<BuildId, ActiveTask>,
    /// Memory admitted but not yet visible as a platform task.
    reservations: HashMap<BuildId, u64>,
}

impl TaskState {
    fn reserved_mb(&self) -> u64 {
        self.reservations.values().sum()
    }
}

struct Inner {
    api: Arc<dyn ComputeApi>,
    reporter: Arc<dyn StatusReporter>,
    settings: TaskPoolSettings,
    state: Mutex<TaskState>,
    /// Serializes admission checks so reservations are seen by the next check.
    admission: Mutex<()>,
}

impl Inner {
    fn sizing(&self, build: &Build) -> TaskSizing {
        let custom_repo = build
            .owner_repository()
            .is_some_and(|repo| self.settings.custom_repos.contains(&repo));

        if build.is_large() || custom_repo {
            self.settings.custom_sizing
        } else {
            self.settings.default_sizing
        }
    }

    async fn templates(&self) -> Result<Vec<BuildContainer>> {
        self.api
            .fetch_build_containers_by_label(&self.settings.template_label)
            .await
    }

    async fn dispatch(self: &Arc<Self>, build: &Arc<Build>) -> Result<()> {
        let templates = self.templates().await?;
        if templates.is_empty() {
            return Err(Error::NoContainersAvailable);
        }

        let name = build.container_name();
        let template = templates
            .iter()
            .find(|t| t.container_name.as_deref() == Some(name))
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;

        let spec = self.task_spec(template, build)?;
        let task = self
            .api
            .start_task(template, &spec)
            .await
            .map_err(|e| Error::TaskStart(e.to_string()))?;

        info!(
            build_id = %build.build_id,
            task = %task.guid,
            memory_mb = spec.memory_in_mb,
            "Started build task"
        );

        {
            let mut state = self.state.lock().await;
            let timer = self.start_timer(Arc::clone(build));
            state.builds.insert(
                build.build_id.clone(),
                ActiveTask {
                    task_guid: task.guid,
                    timer,
                },
            );
        }

        let reporter = Arc::clone(&self.reporter);
        let build = Arc::clone(build);
        tokio::spawn(async move {
            if let Err(e) = reporter
                .report_status(&build, BuildStatus::Tasked, "")
                .await
            {
                error!(build_id = %build.build_id, error = %e, "Error reporting tasked status");
            }
        });

        Ok(())
    }

    fn task_spec(&self, template: &BuildContainer, build: &Build) -> Result<TaskSpec> {
        let sizing = self.sizing(build);
        let command = template
            .command
            .as_deref()
            .unwrap_or(&self.settings.task_command);
        let environment = serde_json::to_string(&build.container_environment)?;
        let task_id = build
            .source_build_id()
            .unwrap_or_else(|| build.build_id.as_str());

        Ok(TaskSpec {
            name: format!("build-{}", task_id),
            command: format!("{} '{}'", command, shell_quote(&environment)),
            memory_in_mb: sizing.memory_mb,
            disk_in_mb: sizing.disk_mb,
            label: self.settings.task_label.clone(),
        })
    }

    /// Forget `build_id`. The timeout path passes `cancel_timer = false`.
    async fn release(&self, build_id: &BuildId, cancel_timer: bool) -> Option<String> {
        let mut state = self.state.lock().await;
        state.reservations.remove(build_id);
        let active = state.builds.remove(build_id)?;
        if cancel_timer {
            active.timer.cancel();
        }
        Some(active.task_guid)
    }

    async fn cancel_task(&self, build_id: &BuildId, task_guid: &str) {
        if let Err(e) = self.api.stop_task(task_guid).await {
            debug!(build_id = %build_id, task = %task_guid, error = %e, "Failed to cancel task");
        }
    }

    fn start_timer(self: &Arc<Self>, build: Arc<Build>) -> BuildTimer {
        let inner = Arc::clone(self);
        BuildTimer::start(self.settings.build_timeout, async move {
            warn!(build_id = %build.build_id, "Build timed out");
            if let Some(task_guid) = inner.release(&build.build_id, false).await {
                inner.cancel_task(&build.build_id, &task_guid).await;
                report_timeout(inner.reporter.as_ref(), &build, false).await;
            }
        })
    }
}

/// Escape single quotes for a single-quoted shell argument.
fn shell_quote(value: &str) -> String {
    value.replace('\'', r"'\''")
}

/// Builder pool that starts one task per build under a memory ceiling.
pub struct TaskPool {
    inner: Arc<Inner>,
}

impl TaskPool {
    pub fn new(
        api: Arc<dyn ComputeApi>,
        reporter: Arc<dyn StatusReporter>,
        settings: TaskPoolSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                reporter,
                settings,
                state: Mutex::new(TaskState::default()),
                admission: Mutex::new(()),
            }),
        }
    }

    /// Memory and disk a build would be started with.
    pub fn sizing(&self, build: &Build) -> TaskSizing {
        self.inner.sizing(build)
    }

    pub async fn active_builds(&self) -> Vec<BuildId> {
        let state = self.inner.state.lock().await;
        state.builds.keys().cloned().collect()
    }

    /// Memory admitted but not yet dispatched.
    pub async fn reserved_memory(&self) -> u64 {
        self.inner.state.lock().await.reserved_mb()
    }
}

#[async_trait]
impl BuilderPool for TaskPool {
    fn name(&self) -> &'static str {
        "task"
    }

    async fn start(&self) -> Result<()> {
        let templates = self.inner.templates().await?;
        if templates.is_empty() {
            return Err(Error::PoolAppNotFound(
                self.inner.settings.template_label.clone(),
            ));
        }
        info!(count = templates.len(), "Found build task templates");
        Ok(())
    }

    async fn stop(&self) {}

    async fn can_start_build(&self, build: &Build) -> Result<bool> {
        let _admission = self.inner.admission.lock().await;
        let settings = &self.inner.settings;

        let tasks = self.inner.api.fetch_active_tasks(&settings.task_label).await?;
        let active_mb: u64 = tasks.iter().map(|task| task.memory_in_mb).sum();
        let required_mb = self.inner.sizing(build).memory_mb;

        let mut state = self.inner.state.lock().await;
        let reserved_mb = if settings.reservations {
            state.reserved_mb()
        } else {
            0
        };

        let admitted = active_mb + reserved_mb + required_mb <= settings.max_memory_mb;
        debug!(
            build_id = %build.build_id,
            active_mb,
            reserved_mb,
            required_mb,
            max_mb = settings.max_memory_mb,
            admitted,
            "Task admission"
        );

        if admitted && settings.reservations {
            state.reservations.insert(build.build_id.clone(), required_mb);
        }
        Ok(admitted)
    }

    async fn start_build(&self, build: Arc<Build>) -> Result<()> {
        let result = self.inner.dispatch(&build).await;
        self.inner
            .state
            .lock()
            .await
            .reservations
            .remove(&build.build_id);
        result
    }

    async fn stop_build(&self, build_id: &BuildId) {
        info!(build_id = %build_id, "Stopping build");
        match self.inner.release(build_id, true).await {
            Some(task_guid) => self.inner.cancel_task(build_id, &task_guid).await,
            None => debug!(build_id = %build_id, "No active task for build"),
        }
    }

    async fn health(&self) -> Result<serde_json::Value> {
        let templates = self.inner.templates().await?;
        if templates.is_empty() {
            return Err(Error::PoolAppNotFound(
                self.inner.settings.template_label.clone(),
            ));
        }

        let tasks = self
            .inner
            .api
            .fetch_active_tasks(&self.inner.settings.task_label)
            .await?;
        let names: Vec<&str> = templates
            .iter()
            .filter_map(|t| t.container_name.as_deref())
            .collect();

        Ok(json!({
            "templates": names,
            "activeTasks": tasks.len(),
            "activeMemoryMb": tasks.iter().map(|t| t.memory_in_mb).sum::<u64>(),
            "maxMemoryMb": self.inner.settings.max_memory_mb,
        }))
    }
}
