//! Per-build timeouts.

use pagebuild_core::{Build, BuildStatus, StatusReporter};
use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::error;

/// Message sent with the `error` status when a build times out.
pub const TIMEOUT_MESSAGE: &str = "The build timed out";

/// A pending timeout for one dispatched build.
///
/// The timeout future runs on its own task after `duration`. Cancelling
/// aborts that task if it has not fired yet. The firing path must not
/// cancel its own timer.
#[derive(Debug)]
pub struct BuildTimer {
    handle: AbortHandle,
}

impl BuildTimer {
    pub fn start<F>(duration: Duration, on_timeout: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_timeout.await;
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Report a timed-out build. Failures are logged, never returned.
///
/// Container builds also get a line in their build log; task builds emit
/// their own logs, so they only get the status update.
pub async fn report_timeout(reporter: &dyn StatusReporter, build: &Build, with_log: bool) {
    let status = reporter.report_status(build, BuildStatus::Error, TIMEOUT_MESSAGE);

    let result = if with_log {
        let log = reporter.report_log(build, TIMEOUT_MESSAGE);
        let (log, status) = tokio::join!(log, status);
        log.and(status)
    } else {
        status.await
    };

    if let Err(e) = result {
        error!(build_id = %build.build_id, error = %e, "Error reporting build timeout");
    }
}
