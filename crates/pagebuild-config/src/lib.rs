//! Configuration for the pagebuild scheduler.
//!
//! Every setting can be given as a command-line flag or an environment
//! variable. This crate handles:
//! - Server and callback settings
//! - Compute-control API credentials
//! - Queue backends
//! - Builder pool selection and sizing

pub mod error;
pub mod pool;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use pool::{ContainerPoolSettings, PoolConfig, PoolKind, TaskPoolSettings, TaskSizing};
pub use system::{CloudConfig, Config, QueueBackend, QueueConfig, ServerConfig};
