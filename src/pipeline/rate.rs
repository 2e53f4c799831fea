use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{Item, ItemStatus};

use super::pool::{BatchReport, ItemOutcome, StageWorker, WorkerPool};
use super::stats::StageKind;
use super::traits::Rater;

/// `fetched -> rated`.
pub struct RateStage {
    criteria: String,
    rater: Arc<dyn Rater>,
}

impl RateStage {
    pub fn new(criteria: impl Into<String>, rater: Arc<dyn Rater>) -> Self {
        Self {
            criteria: criteria.into(),
            rater,
        }
    }

    pub async fn run_batch(
        self,
        pool: &WorkerPool,
        repo: &Repository,
        category: &str,
        date: NaiveDate,
    ) -> Result<BatchReport> {
        let items = repo.items_by_status(ItemStatus::Fetched, category, date).await?;
        if items.is_empty() {
            tracing::info!(category, %date, "nothing to rate");
        }
        Ok(pool.run(Arc::new(self), items).await)
    }
}

#[async_trait]
impl StageWorker for RateStage {
    type Input = Item;

    fn kind(&self) -> StageKind {
        StageKind::Rate
    }

    fn describe(&self, item: &Item) -> String {
        format!("{} ({})", item.title, item.id)
    }

    async fn process(&self, repo: &Repository, item: Item) -> Result<ItemOutcome> {
        let Some(content) = item.content.as_deref().filter(|c| !c.trim().is_empty()) else {
            tracing::warn!(id = item.id, "item has no content to rate");
            return Ok(ItemOutcome::Skipped);
        };

        let rating = self.rater.rate(&self.criteria, &item.title, content).await?;
        match &rating {
            Some(r) => tracing::debug!(id = item.id, score = r.score, "rated"),
            None => tracing::debug!(id = item.id, "judged not relevant"),
        }

        let advanced = repo.record_rating(item.id, rating).await?;
        Ok(if advanced {
            ItemOutcome::Advanced
        } else {
            ItemOutcome::Skipped
        })
    }
}
