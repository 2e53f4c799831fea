use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{Item, ItemStatus};

use super::pool::{BatchReport, ItemOutcome, StageWorker, WorkerPool};
use super::stats::StageKind;
use super::traits::Summarizer;

/// `selected_for_summary -> summarized`.
pub struct SummarizeStage {
    summarizer: Arc<dyn Summarizer>,
}

impl SummarizeStage {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }

    pub async fn run_batch(
        self,
        pool: &WorkerPool,
        repo: &Repository,
        category: &str,
        date: NaiveDate,
    ) -> Result<BatchReport> {
        let items = repo
            .items_by_status(ItemStatus::SelectedForSummary, category, date)
            .await?;
        if items.is_empty() {
            tracing::info!(category, %date, "nothing to summarize");
        }
        Ok(pool.run(Arc::new(self), items).await)
    }
}

#[async_trait]
impl StageWorker for SummarizeStage {
    type Input = Item;

    fn kind(&self) -> StageKind {
        StageKind::Summarize
    }

    fn describe(&self, item: &Item) -> String {
        format!("{} ({})", item.title, item.id)
    }

    async fn process(&self, repo: &Repository, item: Item) -> Result<ItemOutcome> {
        let Some(content) = item.content.as_deref().filter(|c| !c.trim().is_empty()) else {
            tracing::warn!(id = item.id, "item has no content to summarize");
            return Ok(ItemOutcome::Skipped);
        };

        // partial payloads are kept; the summarizer errors only when
        // every part failed
        let payload = self.summarizer.summarize(&item.title, content).await?;

        let advanced = repo.record_summary(item.id, payload).await?;
        Ok(if advanced {
            ItemOutcome::Advanced
        } else {
            ItemOutcome::Skipped
        })
    }
}
