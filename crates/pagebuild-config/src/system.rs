//! Process-wide configuration.

use clap::{Args, Parser, ValueEnum};
use std::time::Duration;
use url::Url;

use crate::{ConfigError, ConfigResult, PoolConfig};

/// Full scheduler configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "pagebuild-server")]
#[command(about = "Schedules site builds from work queues onto build containers", long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub cloud: CloudConfig,

    #[command(flatten)]
    pub queue: QueueConfig,

    #[command(flatten)]
    pub pool: PoolConfig,
}

impl Config {
    /// Parse flags and environment, then validate.
    pub fn load() -> ConfigResult<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.server.validate()?;
        self.cloud.validate()?;
        self.queue.validate()?;
        self.pool.validate()
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Port for the operator HTTP server
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Externally reachable base URL builds call back to
    #[arg(long, env = "BUILD_COMPLETE_CALLBACK_HOST")]
    pub callback_host: String,
}

impl ServerConfig {
    fn validate(&self) -> ConfigResult<()> {
        Url::parse(&self.callback_host)
            .map_err(|e| ConfigError::invalid("callback_host", e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
pub struct CloudConfig {
    /// Base URL of the compute-control API
    #[arg(long, env = "CLOUD_FOUNDRY_API_HOST")]
    pub api_host: String,

    /// OAuth token endpoint
    #[arg(long, env = "CLOUD_FOUNDRY_OAUTH_TOKEN_URL")]
    pub token_url: String,

    /// Deploy user name
    #[arg(long, env = "DEPLOY_USER_USERNAME")]
    pub username: String,

    /// Deploy user password
    #[arg(long, env = "DEPLOY_USER_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Space holding the fixed build containers
    #[arg(long, env = "BUILD_SPACE_GUID")]
    pub space_guid: Option<String>,

    /// Docker image that identifies build containers in the space
    #[arg(long, env = "BUILD_CONTAINER_DOCKER_IMAGE_NAME")]
    pub container_image: Option<String>,
}

impl CloudConfig {
    fn validate(&self) -> ConfigResult<()> {
        Url::parse(&self.api_host).map_err(|e| ConfigError::invalid("api_host", e.to_string()))?;
        Url::parse(&self.token_url)
            .map_err(|e| ConfigError::invalid("token_url", e.to_string()))?;
        Ok(())
    }
}

/// Queue backend to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueueBackend {
    /// In-process queue, for local runs.
    Memory,
    /// Redis job lists.
    Redis,
}

#[derive(Debug, Clone, Args)]
pub struct QueueConfig {
    /// Queue backend
    #[arg(long = "queue-backend", env = "QUEUE_BACKEND", value_enum, default_value = "redis")]
    pub backend: QueueBackend,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Comma-separated queue names; each becomes one queue source
    #[arg(long, env = "QUEUE_NAMES", value_delimiter = ',', default_value = "site-build-queue")]
    pub queue_names: Vec<String>,

    /// Seconds a receive call may block waiting for a job
    #[arg(long, env = "QUEUE_POLL_TIMEOUT_SECONDS", default_value_t = 5)]
    pub poll_timeout_secs: u64,

    /// Seconds before an unacknowledged job is delivered again
    #[arg(long, env = "QUEUE_VISIBILITY_TIMEOUT_SECONDS", default_value_t = 60)]
    pub visibility_timeout_secs: u64,
}

impl QueueConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.queue_names.iter().all(|n| n.trim().is_empty()) {
            return Err(ConfigError::MissingField("queue_names".to_string()));
        }
        if self.backend == QueueBackend::Redis && self.redis_url.is_none() {
            return Err(ConfigError::MissingField("redis_url".to_string()));
        }
        if self.visibility_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "visibility_timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolKind;

    const REQUIRED: [&str; 11] = [
        "pagebuild-server",
        "--callback-host",
        "https://builder.example.com",
        "--api-host",
        "https://api.example.com",
        "--token-url",
        "https://login.example.com/oauth/token",
        "--username",
        "deployer",
        "--password",
        "secret",
    ];

    fn parse(extra: &[&str]) -> Config {
        let args: Vec<&str> = REQUIRED.iter().chain(extra.iter()).copied().collect();
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--redis-url", "redis://localhost:6379"]);
        assert_eq!(config.pool.kind, PoolKind::Task);
        assert_eq!(config.pool.build_timeout_secs, 21 * 60);
        assert_eq!(config.queue.queue_names, vec!["site-build-queue"]);
        assert!(config.pool.task_reservations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let config = parse(&[]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "redis_url"
        ));
    }

    #[test]
    fn test_memory_backend_needs_no_url() {
        let config = parse(&["--queue-backend", "memory"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_names_are_split() {
        let config = parse(&["--queue-backend", "memory", "--queue-names", "a,b"]);
        assert_eq!(config.queue.queue_names, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_callback_host() {
        let mut config = parse(&["--queue-backend", "memory"]);
        config.server.callback_host = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "callback_host"
        ));
    }

    #[test]
    fn test_task_ceiling_must_fit_one_task() {
        let config = parse(&[
            "--queue-backend",
            "memory",
            "--max-task-memory-mb",
            "1024",
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "max_task_memory_mb"
        ));
    }

    #[test]
    fn test_task_settings() {
        let config = parse(&[
            "--queue-backend",
            "memory",
            "--custom-task-repos",
            "Owner/Repo, other/site",
            "--task-reservations",
            "false",
        ]);
        let settings = config.pool.task_settings();
        assert_eq!(settings.custom_repos, vec!["owner/repo", "other/site"]);
        assert!(!settings.reservations);
        assert_eq!(settings.default_sizing.memory_mb, 2048);
        assert_eq!(settings.custom_sizing.disk_mb, 6144);
    }

    #[test]
    fn test_container_settings() {
        let config = parse(&[
            "--queue-backend",
            "memory",
            "--pool",
            "container",
            "--build-timeout-secs",
            "30",
            "--expected-containers",
            "4",
        ]);
        let settings = config.pool.container_settings();
        assert_eq!(settings.build_timeout, Duration::from_secs(30));
        assert_eq!(settings.refresh_interval, Duration::from_secs(60));
        assert_eq!(settings.expected_containers, 4);
    }
}
