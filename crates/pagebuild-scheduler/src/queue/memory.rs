//! In-process queue.

use async_trait::async_trait;
use pagebuild_core::{Error, QueueMessage, QueueSource, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Pending {
    id: String,
    body: String,
}

#[derive(Debug)]
struct Delivery {
    pending: Pending,
    deadline: Instant,
    /// Receive order, used to requeue expired deliveries in sequence.
    seq: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    ready: VecDeque<Pending>,
    /// Receipt handle -> delivered message.
    in_flight: HashMap<String, Delivery>,
    next_id: u64,
    next_receipt: u64,
}

impl MemoryState {
    /// Make expired deliveries visible again, ahead of newer messages and in
    /// the order they were first received.
    fn reclaim_expired(&mut self, now: Instant) {
        let mut expired: Vec<(u64, String)> = self
            .in_flight
            .iter()
            .filter(|(_, delivery)| delivery.deadline <= now)
            .map(|(receipt, delivery)| (delivery.seq, receipt.clone()))
            .collect();
        expired.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, receipt) in expired.into_iter().rev() {
            if let Some(delivery) = self.in_flight.remove(&receipt) {
                self.ready.push_front(delivery.pending);
            }
        }
    }
}

/// Queue held in memory with SQS-like visibility semantics.
///
/// `receive_message` never blocks. A received message is hidden until it is
/// deleted or its visibility timeout passes, after which it is delivered
/// again.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<MemoryState>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Enqueue a raw JSON payload and return its message id.
    pub async fn push(&self, body: impl Into<String>) -> String {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("{}-{}", self.name, state.next_id);
        state.ready.push_back(Pending {
            id: id.clone(),
            body: body.into(),
        });
        id
    }

    /// Messages waiting to be received.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages received but not yet deleted.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl QueueSource for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive_message(&self) -> Result<Option<QueueMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.reclaim_expired(now);

        let Some(pending) = state.ready.pop_front() else {
            return Ok(None);
        };

        state.next_receipt += 1;
        let seq = state.next_receipt;
        let receipt = format!("{}#{}", pending.id, seq);
        let message = QueueMessage {
            id: pending.id.clone(),
            receipt: receipt.clone(),
            body: pending.body.clone(),
        };
        state.in_flight.insert(
            receipt,
            Delivery {
                pending,
                deadline: now + self.visibility_timeout,
                seq,
            },
        );
        Ok(Some(message))
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&message.receipt)
            .map(|_| ())
            .ok_or_else(|| {
                Error::Queue(format!(
                    "receipt {} for message {} is no longer valid",
                    message.receipt, message.id
                ))
            })
    }

    async fn attributes(&self) -> Result<BTreeMap<String, u64>> {
        let state = self.state.lock().await;
        Ok(BTreeMap::from([
            ("waiting".to_string(), state.ready.len() as u64),
            ("active".to_string(), state.in_flight.len() as u64),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_is_fifo_and_empty_returns_none() {
        let queue = MemoryQueue::new("builds", Duration::from_secs(60));
        assert!(queue.receive_message().await.unwrap().is_none());

        queue.push("first").await;
        queue.push("second").await;

        let first = queue.receive_message().await.unwrap().unwrap();
        let second = queue.receive_message().await.unwrap().unwrap();
        assert_eq!(first.body, "first");
        assert_eq!(second.body, "second");
        assert!(queue.receive_message().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_message_is_redelivered() {
        let queue = MemoryQueue::new("builds", Duration::from_secs(30));
        let id = queue.push("payload").await;

        let first = queue.receive_message().await.unwrap().unwrap();
        assert!(queue.receive_message().await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(31)).await;

        let again = queue.receive_message().await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_ne!(again.receipt, first.receipt);

        // The stale receipt no longer acknowledges anything.
        assert!(queue.delete_message(&first).await.is_err());
        queue.delete_message(&again).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_keeps_receive_order() {
        let queue = MemoryQueue::new("builds", Duration::from_secs(30));
        for i in 0..10 {
            queue.push(format!("m{}", i)).await;
        }
        for _ in 0..10 {
            queue.receive_message().await.unwrap().unwrap();
        }
        queue.push("late").await;

        tokio::time::advance(Duration::from_secs(31)).await;

        let mut bodies = Vec::new();
        while let Some(message) = queue.receive_message().await.unwrap() {
            bodies.push(message.body);
        }
        let mut expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
        expected.push("late".to_string());
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn test_delete_acknowledges_once() {
        let queue = MemoryQueue::new("builds", Duration::from_secs(60));
        queue.push("payload").await;
        let message = queue.receive_message().await.unwrap().unwrap();

        queue.delete_message(&message).await.unwrap();
        assert!(matches!(
            queue.delete_message(&message).await,
            Err(Error::Queue(_))
        ));
    }

    #[tokio::test]
    async fn test_attributes() {
        let queue = MemoryQueue::new("builds", Duration::from_secs(60));
        queue.push("a").await;
        queue.push("b").await;
        queue.receive_message().await.unwrap();

        let attributes = queue.attributes().await.unwrap();
        assert_eq!(attributes["waiting"], 1);
        assert_eq!(attributes["active"], 1);
    }
}
