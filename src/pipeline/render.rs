use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{Item, ItemStatus};

use super::pool::{BatchReport, ItemOutcome, StageWorker, WorkerPool};
use super::stats::StageKind;
use super::traits::Thumbnailer;

/// `summarized -> complete`. An item with no usable image still completes;
/// only a thumbnailer error leaves it `summarized`.
pub struct RenderStage {
    thumbnailer: Arc<dyn Thumbnailer>,
}

impl RenderStage {
    pub fn new(thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        Self { thumbnailer }
    }

    pub async fn run_batch(
        self,
        pool: &WorkerPool,
        repo: &Repository,
        category: &str,
        date: NaiveDate,
    ) -> Result<BatchReport> {
        let items = repo
            .items_by_status(ItemStatus::Summarized, category, date)
            .await?;
        Ok(pool.run(Arc::new(self), items).await)
    }
}

#[async_trait]
impl StageWorker for RenderStage {
    type Input = Item;

    fn kind(&self) -> StageKind {
        StageKind::Render
    }

    fn describe(&self, item: &Item) -> String {
        format!("{} ({})", item.title, item.id)
    }

    async fn process(&self, repo: &Repository, item: Item) -> Result<ItemOutcome> {
        let thumbnail = self.thumbnailer.thumbnail(&item).await?;
        if thumbnail.is_none() {
            tracing::debug!(id = item.id, url = %item.url, "no thumbnail found");
        }

        let advanced = repo.record_thumbnail(item.id, thumbnail).await?;
        Ok(if advanced {
            ItemOutcome::Advanced
        } else {
            ItemOutcome::Skipped
        })
    }
}
