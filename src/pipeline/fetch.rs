use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::FeedEntry;
use crate::models::NewItem;

use super::pool::{BatchReport, ItemOutcome, StageWorker, WorkerPool};
use super::stats::StageKind;
use super::traits::{ContentExtractor, FeedSource};

/// Discovers the entries a category's feeds published on the run date and
/// stores each one as a `fetched` item.
pub struct FetchStage {
    category: String,
    date: NaiveDate,
    keywords: Vec<String>,
    extractor: Arc<dyn ContentExtractor>,
}

impl FetchStage {
    pub fn new(
        category: impl Into<String>,
        date: NaiveDate,
        keywords: Vec<String>,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Self {
        Self {
            category: category.into(),
            date,
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            extractor,
        }
    }

    /// List every feed, keep the entries published on the run date, and
    /// fetch them through the pool.
    pub async fn run_batch(
        self,
        pool: &WorkerPool,
        source: &dyn FeedSource,
        feed_urls: &[String],
    ) -> BatchReport {
        let entries = list_entries(source, feed_urls, pool.workers()).await;
        let listed = entries.len();
        let entries = entries_for_date(entries, self.date);

        tracing::info!(
            category = %self.category,
            date = %self.date,
            feeds = feed_urls.len(),
            listed,
            on_date = entries.len(),
            "fetching items"
        );

        pool.run(Arc::new(self), entries).await
    }

    fn matches_keywords(&self, content: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lowered = content.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

#[async_trait]
impl StageWorker for FetchStage {
    type Input = FeedEntry;

    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    fn describe(&self, input: &FeedEntry) -> String {
        input.url.clone()
    }

    async fn process(&self, repo: &Repository, entry: FeedEntry) -> Result<ItemOutcome> {
        if let Err(e) = validate_entry(&entry) {
            tracing::debug!(error = %e, "skipping malformed entry");
            return Ok(ItemOutcome::Skipped);
        }

        let Some(content) = self.extractor.extract(&entry.url).await? else {
            tracing::debug!(url = %entry.url, "no readable content");
            return Ok(ItemOutcome::Skipped);
        };

        if !self.matches_keywords(&content) {
            tracing::debug!(url = %entry.url, "none of the keywords found");
            return Ok(ItemOutcome::Skipped);
        }

        let publication_date = entry
            .published
            .map(|d| d.date_naive())
            .unwrap_or(self.date)
            .format("%Y-%m-%d")
            .to_string();

        let inserted = repo
            .insert_item(NewItem {
                url: entry.url,
                title: entry.title,
                publication_date,
                fetch_date: self.date,
                category: self.category.clone(),
                content,
            })
            .await?;

        Ok(if inserted {
            ItemOutcome::Advanced
        } else {
            ItemOutcome::Skipped
        })
    }
}

/// List all feeds concurrently. A feed that fails is logged and contributes
/// nothing; it does not fail the category.
pub async fn list_entries(
    source: &dyn FeedSource,
    feed_urls: &[String],
    concurrency: usize,
) -> Vec<FeedEntry> {
    let results: Vec<Vec<FeedEntry>> = stream::iter(feed_urls)
        .map(|url| async move {
            match source.fetch_entries(url).await {
                Ok(entries) => {
                    tracing::debug!(feed = %url, entries = entries.len(), "listed feed");
                    Some(entries)
                }
                Err(e) => {
                    tracing::warn!(feed = %url, error = %e, "failed to list feed");
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|r| async { r })
        .collect()
        .await;

    results.into_iter().flatten().collect()
}

/// Keep entries published on `date` (UTC), first occurrence of each url.
/// Undated entries cannot be placed on a run date and are dropped.
pub fn entries_for_date(entries: Vec<FeedEntry>, date: NaiveDate) -> Vec<FeedEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| e.published.map(|p| p.date_naive()) == Some(date))
        .filter(|e| seen.insert(e.url.clone()))
        .collect()
}

fn validate_entry(entry: &FeedEntry) -> Result<()> {
    if entry.title.trim().is_empty() {
        return Err(AppError::MalformedItem(format!("missing title: {}", entry.url)));
    }
    if url::Url::parse(&entry.url).is_err() {
        return Err(AppError::MalformedItem(format!("bad link: {}", entry.url)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(url: &str, day: u32) -> FeedEntry {
        FeedEntry {
            url: url.to_string(),
            title: "t".to_string(),
            published: Some(Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn only_entries_from_the_run_date_are_kept() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut undated = entry("https://example.com/undated", 2);
        undated.published = None;
        let kept = entries_for_date(
            vec![
                entry("https://example.com/old", 1),
                entry("https://example.com/new", 2),
                entry("https://example.com/new", 2),
                undated,
            ],
            date,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "https://example.com/new");
    }

    #[test]
    fn run_dates_follow_the_utc_publication_date() {
        // 07:30 on May 2 at UTC+8 is still May 1 in UTC
        let late = FeedEntry {
            url: "https://example.com/late".into(),
            title: "t".into(),
            published: Some(Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap()),
        };
        let may_1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let may_2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();

        assert_eq!(entries_for_date(vec![late.clone()], may_1).len(), 1);
        assert!(entries_for_date(vec![late], may_2).is_empty());
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let mut no_title = entry("https://example.com/a", 2);
        no_title.title = "  ".into();
        assert!(validate_entry(&no_title).is_err());
        assert!(validate_entry(&entry("not a link", 2)).is_err());
        assert!(validate_entry(&entry("https://example.com/a", 2)).is_ok());
    }
}
