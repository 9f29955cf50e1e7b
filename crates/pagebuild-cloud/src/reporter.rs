//! HTTP status and log callbacks.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pagebuild_core::{Build, BuildStatus, Error, Result, StatusReporter};
use serde::Serialize;
use tracing::debug;

/// Value of the `source` field in log callbacks.
pub const LOG_SOURCE: &str = "Build scheduler";

#[derive(Debug, Serialize)]
struct StatusBody {
    status: BuildStatus,
    message: String,
}

#[derive(Debug, Serialize)]
struct LogBody {
    output: String,
    source: &'static str,
}

/// Posts build lifecycle events to the callbacks carried in the build's
/// environment.
#[derive(Clone, Default)]
pub struct HttpStatusReporter {
    http: reqwest::Client,
}

impl HttpStatusReporter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::StatusReport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::StatusReport(format!(
                "{} responded {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report_status(&self, build: &Build, status: BuildStatus, message: &str) -> Result<()> {
        let url = build
            .status_callback()
            .ok_or_else(|| Error::StatusReport("build has no status callback".to_string()))?;

        debug!(build_id = %build.build_id, %status, "Sending status request");

        let body = StatusBody {
            status,
            message: BASE64.encode(message),
        };
        self.post(url, &body).await
    }

    async fn report_log(&self, build: &Build, output: &str) -> Result<()> {
        let url = build
            .log_callback()
            .ok_or_else(|| Error::StatusReport("build has no log callback".to_string()))?;

        debug!(build_id = %build.build_id, "Sending log request");

        let body = LogBody {
            output: BASE64.encode(output),
            source: LOG_SOURCE,
        };
        self.post(url, &body).await
    }
}
