use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::db::Repository;
use crate::error::Result;

use super::stats::{PipelineStats, StageKind};

/// What happened to one input that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item moved to the stage's target status.
    Advanced,
    /// Nothing was written: malformed input, filtered out, duplicate, or
    /// already moved by someone else.
    Skipped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub advanced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.advanced + self.skipped + self.failed
    }

    fn merge(&mut self, other: BatchReport) {
        self.advanced += other.advanced;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Per-item work of one stage. Implementations hold no per-item state;
/// everything they need arrives with the input or through the store.
#[async_trait]
pub trait StageWorker: Send + Sync + 'static {
    type Input: Send + 'static;

    fn kind(&self) -> StageKind;

    /// Short label for log lines.
    fn describe(&self, input: &Self::Input) -> String;

    async fn process(&self, repo: &Repository, input: Self::Input) -> Result<ItemOutcome>;
}

/// Fixed-size pool that drains one batch per call. Every worker opens its
/// own store connection and keeps it until the batch is drained.
pub struct WorkerPool {
    db_path: PathBuf,
    workers: usize,
    stats: Arc<PipelineStats>,
}

impl WorkerPool {
    pub fn new(db_path: impl Into<PathBuf>, workers: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            db_path: db_path.into(),
            workers: workers.max(1),
            stats,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every input and wait for all workers to finish. Item errors
    /// are logged and counted, never returned.
    pub async fn run<W: StageWorker>(&self, worker: Arc<W>, inputs: Vec<W::Input>) -> BatchReport {
        let kind = worker.kind();
        let stage_stats = self.stats.stage(kind);
        stage_stats.batches.inc();

        if inputs.is_empty() {
            tracing::debug!(stage = kind.name(), "empty batch");
            return BatchReport::default();
        }

        let worker_count = self.workers.min(inputs.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(inputs)));
        let mut set = JoinSet::new();

        for worker_id in 0..worker_count {
            let queue = Arc::clone(&queue);
            let worker = Arc::clone(&worker);
            let stats = Arc::clone(&self.stats);
            let db_path = self.db_path.clone();

            set.spawn(async move {
                let repo = Repository::connect(&db_path).await?;
                let mut report = BatchReport::default();

                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some(input) = next else { break };

                    let label = worker.describe(&input);
                    let started = Instant::now();
                    let result = AssertUnwindSafe(worker.process(&repo, input))
                        .catch_unwind()
                        .await;
                    let stage_stats = stats.stage(kind);
                    stage_stats.record_item_time(started.elapsed());

                    match result {
                        Ok(Ok(ItemOutcome::Advanced)) => {
                            tracing::debug!(
                                stage = kind.name(),
                                worker_id,
                                item = %label,
                                "advanced"
                            );
                            stage_stats.advanced.inc();
                            report.advanced += 1;
                        }
                        Ok(Ok(ItemOutcome::Skipped)) => {
                            tracing::debug!(
                                stage = kind.name(),
                                worker_id,
                                item = %label,
                                "skipped"
                            );
                            stage_stats.skipped.inc();
                            report.skipped += 1;
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(
                                stage = kind.name(),
                                worker_id,
                                item = %label,
                                error = %e,
                                "item failed"
                            );
                            stage_stats.failed.inc();
                            report.failed += 1;
                        }
                        Err(payload) => {
                            tracing::error!(
                                stage = kind.name(),
                                worker_id,
                                item = %label,
                                panic = panic_message(payload.as_ref()),
                                "item panicked"
                            );
                            stage_stats.failed.inc();
                            report.failed += 1;
                        }
                    }
                }

                Ok::<_, crate::error::AppError>(report)
            });
        }

        let mut total = BatchReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(report)) => total.merge(report),
                Ok(Err(e)) => {
                    tracing::error!(
                        stage = kind.name(),
                        error = %e,
                        "worker could not open the store"
                    );
                }
                Err(e) => {
                    // outside item processing; whatever is still queued is
                    // picked up by the other workers or counted below
                    tracing::error!(stage = kind.name(), error = %e, "worker task aborted");
                }
            }
        }

        let leftover = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        if leftover > 0 {
            tracing::error!(stage = kind.name(), leftover, "items left unprocessed");
            stage_stats.failed.add(leftover as u64);
            total.failed += leftover;
        }

        tracing::info!(
            stage = kind.name(),
            advanced = total.advanced,
            skipped = total.skipped,
            failed = total.failed,
            "batch drained"
        );
        total
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
