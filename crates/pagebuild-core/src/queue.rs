//! Queue source trait.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::{BuildPayload, Result};

/// A message received from a queue, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Backend identifier of the message.
    pub id: String,
    /// Handle used to acknowledge the message.
    pub receipt: String,
    /// Raw JSON payload.
    pub body: String,
}

/// A work queue with at-least-once delivery.
///
/// `receive_message` is expected to long-poll for a bounded window. The
/// scheduler does not sleep between polls, so a backend that returns
/// immediately when empty makes the scheduler re-poll it as fast as it can.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Name used in logs and the healthcheck.
    fn name(&self) -> &str;

    /// Receive at most one message.
    async fn receive_message(&self) -> Result<Option<QueueMessage>>;

    /// Acknowledge a message so it is not redelivered.
    async fn delete_message(&self, message: &QueueMessage) -> Result<()>;

    /// Decode the build payload carried by a message.
    fn extract_message_data(&self, message: &QueueMessage) -> Result<BuildPayload> {
        BuildPayload::from_json(&message.body)
    }

    /// Queue depth counters.
    async fn attributes(&self) -> Result<BTreeMap<String, u64>>;
}
