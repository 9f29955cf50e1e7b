//! Builder pool configuration.

use clap::{Args, ValueEnum};
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Default build timeout: 21 minutes.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 21 * 60;

/// Which pool strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PoolKind {
    /// Fixed roster of long-lived build containers.
    Container,
    /// One short-lived task per build under a memory budget.
    Task,
}

#[derive(Debug, Clone, Args)]
pub struct PoolConfig {
    /// Builder pool strategy
    #[arg(long = "pool", env = "BUILDER_POOL_TYPE", value_enum, default_value = "task")]
    pub kind: PoolKind,

    /// Seconds before a dispatched build is considered timed out
    #[arg(long, env = "BUILD_TIMEOUT_SECONDS", default_value_t = DEFAULT_BUILD_TIMEOUT_SECS)]
    pub build_timeout_secs: u64,

    /// Seconds between container roster refreshes
    #[arg(long, env = "ROSTER_REFRESH_SECONDS", default_value_t = 60)]
    pub refresh_interval_secs: u64,

    /// Number of build containers the roster should contain
    #[arg(long, env = "EXPECTED_NUM_BUILD_CONTAINERS", default_value_t = 0)]
    pub expected_containers: usize,

    /// Label identifying task templates
    #[arg(long, env = "BUILD_CONTAINER_LABEL", default_value = "build-container")]
    pub template_label: String,

    /// Label attached to every task this pool starts
    #[arg(long, env = "TASK_LABEL", default_value = "build-task")]
    pub task_label: String,

    /// Command used when a template does not declare its own
    #[arg(long, env = "TASK_APP_COMMAND", default_value = "cd app && python main.py -p")]
    pub task_command: String,

    /// Memory per task in MB
    #[arg(long, env = "TASK_MEMORY_MB", default_value_t = 2 * 1024)]
    pub task_memory_mb: u64,

    /// Disk per task in MB
    #[arg(long, env = "TASK_DISK_MB", default_value_t = 4 * 1024)]
    pub task_disk_mb: u64,

    /// Memory per task in MB for large builds
    #[arg(long, env = "TASK_CUSTOM_MEMORY_MB", default_value_t = 8 * 1024)]
    pub task_custom_memory_mb: u64,

    /// Disk per task in MB for large builds
    #[arg(long, env = "TASK_CUSTOM_DISK_MB", default_value_t = 6 * 1024)]
    pub task_custom_disk_mb: u64,

    /// Memory ceiling in MB across all active tasks
    #[arg(long, env = "MAX_TASK_MEMORY_MB", default_value_t = 30 * 1024)]
    pub max_task_memory_mb: u64,

    /// Comma-separated `owner/repo` list that always gets large tasks
    #[arg(long, env = "CUSTOM_TASK_MEM_REPOS", value_delimiter = ',')]
    pub custom_task_repos: Vec<String>,

    /// Reserve memory locally between admission and dispatch
    #[arg(long, env = "TASK_RESERVATIONS", default_value_t = true, action = clap::ArgAction::Set)]
    pub task_reservations: bool,
}

impl PoolConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.kind == PoolKind::Container && self.refresh_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "refresh_interval_secs",
                "must be greater than zero",
            ));
        }

        if self.kind == PoolKind::Task {
            if self.task_label.is_empty() {
                return Err(ConfigError::MissingField("task_label".to_string()));
            }
            if self.template_label.is_empty() {
                return Err(ConfigError::MissingField("template_label".to_string()));
            }
            let largest = self.task_memory_mb.max(self.task_custom_memory_mb);
            if largest > self.max_task_memory_mb {
                return Err(ConfigError::invalid(
                    "max_task_memory_mb",
                    format!(
                        "ceiling of {} MB cannot fit a {} MB task",
                        self.max_task_memory_mb, largest
                    ),
                ));
            }
        }

        Ok(())
    }

    pub fn container_settings(&self) -> ContainerPoolSettings {
        ContainerPoolSettings {
            build_timeout: self.build_timeout(),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            expected_containers: self.expected_containers,
        }
    }

    pub fn task_settings(&self) -> TaskPoolSettings {
        TaskPoolSettings {
            build_timeout: self.build_timeout(),
            template_label: self.template_label.clone(),
            task_label: self.task_label.clone(),
            task_command: self.task_command.clone(),
            default_sizing: TaskSizing {
                memory_mb: self.task_memory_mb,
                disk_mb: self.task_disk_mb,
            },
            custom_sizing: TaskSizing {
                memory_mb: self.task_custom_memory_mb,
                disk_mb: self.task_custom_disk_mb,
            },
            max_memory_mb: self.max_task_memory_mb,
            custom_repos: self
                .custom_task_repos
                .iter()
                .map(|r| r.trim().to_lowercase())
                .filter(|r| !r.is_empty())
                .collect(),
            reservations: self.task_reservations,
        }
    }
}

/// Settings for the fixed-roster pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPoolSettings {
    pub build_timeout: Duration,
    pub refresh_interval: Duration,
    pub expected_containers: usize,
}

/// Memory and disk for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSizing {
    pub memory_mb: u64,
    pub disk_mb: u64,
}

/// Settings for the task pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPoolSettings {
    pub build_timeout: Duration,
    pub template_label: String,
    pub task_label: String,
    pub task_command: String,
    pub default_sizing: TaskSizing,
    pub custom_sizing: TaskSizing,
    pub max_memory_mb: u64,
    /// Lowercased `owner/repo` pairs.
    pub custom_repos: Vec<String>,
    pub reservations: bool,
}

impl Default for TaskPoolSettings {
    fn default() -> Self {
        Self {
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            template_label: "build-container".to_string(),
            task_label: "build-task".to_string(),
            task_command: "cd app && python main.py -p".to_string(),
            default_sizing: TaskSizing {
                memory_mb: 2 * 1024,
                disk_mb: 4 * 1024,
            },
            custom_sizing: TaskSizing {
                memory_mb: 8 * 1024,
                disk_mb: 6 * 1024,
            },
            max_memory_mb: 30 * 1024,
            custom_repos: Vec::new(),
            reservations: true,
        }
    }
}

impl Default for ContainerPoolSettings {
    fn default() -> Self {
        Self {
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            refresh_interval: Duration::from_secs(60),
            expected_containers: 0,
        }
    }
}
