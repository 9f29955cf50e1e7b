//! The polling control loop.

use futures::future::join_all;
use pagebuild_core::{Build, BuilderPool, QueueSource, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Outcome of evaluating one source for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The source had no message.
    Empty,
    /// The pool had no room; the message was left on the queue.
    Deferred,
    /// The build started and its message was deleted.
    Started,
}

/// Moves builds from queue sources onto a builder pool.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<dyn BuilderPool>,
    sources: Vec<Arc<dyn QueueSource>>,
    callback_base: String,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        pool: Arc<dyn BuilderPool>,
        sources: Vec<Arc<dyn QueueSource>>,
        callback_base: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            sources,
            callback_base: callback_base.into(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pool(&self) -> &Arc<dyn BuilderPool> {
        &self.pool
    }

    pub fn sources(&self) -> &[Arc<dyn QueueSource>] {
        &self.sources
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the pool, then spawn the polling loop.
    ///
    /// Pool startup errors are returned and nothing is spawned.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        self.pool.start().await?;
        self.running.store(true, Ordering::SeqCst);

        info!(
            pool = self.pool.name(),
            sources = self.sources.len(),
            "Starting scheduler"
        );

        let scheduler = self.clone();
        Ok(tokio::spawn(async move { scheduler.run().await }))
    }

    /// Stop scheduling new ticks. The tick in progress finishes normally.
    pub async fn stop(&self) {
        info!("Stopping scheduler");
        self.running.store(false, Ordering::SeqCst);
        self.pool.stop().await;
    }

    async fn run(&self) {
        while self.is_running() {
            self.tick().await;
            tokio::task::yield_now().await;
        }
        info!("Scheduler stopped");
    }

    /// Evaluate every source once, concurrently.
    ///
    /// A failing source is logged and does not affect the others.
    pub async fn tick(&self) -> Vec<Option<Evaluation>> {
        let evaluations = self.sources.iter().map(|source| async move {
            match self.evaluate(source.as_ref()).await {
                Ok(evaluation) => Some(evaluation),
                Err(e) => {
                    error!(source = source.name(), error = %e, "Error processing queue message");
                    None
                }
            }
        });
        join_all(evaluations).await
    }

    /// Poll, admit, dispatch and acknowledge at most one message.
    pub async fn evaluate(&self, source: &dyn QueueSource) -> Result<Evaluation> {
        let Some(message) = source.receive_message().await? else {
            return Ok(Evaluation::Empty);
        };

        let payload = source.extract_message_data(&message)?;
        let build = Arc::new(Build::new(payload, &self.callback_base));

        if !self.pool.can_start_build(&build).await? {
            debug!(source = source.name(), "No capacity, leaving message on queue");
            return Ok(Evaluation::Deferred);
        }

        self.pool.start_build(Arc::clone(&build)).await?;
        info!(
            source = source.name(),
            build_id = %build.build_id,
            container = build.container_name(),
            "Started build"
        );

        source.delete_message(&message).await?;
        Ok(Evaluation::Started)
    }
}
