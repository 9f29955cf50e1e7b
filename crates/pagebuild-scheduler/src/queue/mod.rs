//! Queue source backends.

mod memory;
mod redis;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

use pagebuild_config::{QueueBackend, QueueConfig};
use pagebuild_core::{Error, QueueSource, Result};
use std::sync::Arc;

/// Create one queue source per configured queue name.
pub async fn connect_sources(config: &QueueConfig) -> Result<Vec<Arc<dyn QueueSource>>> {
    let names = config
        .queue_names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty());

    let mut sources: Vec<Arc<dyn QueueSource>> = Vec::new();
    match config.backend {
        QueueBackend::Memory => {
            for name in names {
                sources.push(Arc::new(MemoryQueue::new(name, config.visibility_timeout())));
            }
        }
        QueueBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| Error::Queue("no Redis URL configured".to_string()))?;
            for name in names {
                let queue = RedisQueue::connect(
                    url,
                    name,
                    config.poll_timeout(),
                    config.visibility_timeout(),
                )
                .await?;
                sources.push(Arc::new(queue));
            }
        }
    }
    Ok(sources)
}
