//! Build status reporting.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Build, Result};

/// Status values sent to a build's status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[display("tasked")]
    Tasked,
    #[display("error")]
    Error,
}

/// Out-of-band notifications about a build's lifecycle.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Post `{status, message}` to the build's status callback.
    async fn report_status(&self, build: &Build, status: BuildStatus, message: &str)
    -> Result<()>;

    /// Post a log line to the build's log callback.
    async fn report_log(&self, build: &Build, output: &str) -> Result<()>;
}
