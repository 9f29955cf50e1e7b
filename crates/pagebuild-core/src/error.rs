//! Error types for pagebuild.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("compute API error: {0}")]
    Api(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("status report failed: {0}")]
    StatusReport(String),

    #[error("unable to start build because no containers were available")]
    PoolExhausted,

    #[error("no build containers exist in this space")]
    NoContainersAvailable,

    #[error("could not find build container with name: \"{0}\"")]
    ContainerNotFound(String),

    #[error("unable to find pool application: {0}")]
    PoolAppNotFound(String),

    #[error("task start failed: {0}")]
    TaskStart(String),

    #[error("unhealthy: {0}")]
    Unhealthy(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
