use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::config::{CategoryConfig, Config};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::parse_opml_file;
use crate::services::{build_digest, write_digest};

use super::fetch::FetchStage;
use super::pool::{BatchReport, WorkerPool};
use super::rate::RateStage;
use super::render::RenderStage;
use super::select::{select_for_summary, SelectionPolicy};
use super::stats::PipelineStats;
use super::summarize::SummarizeStage;
use super::traits::{ContentExtractor, FeedSource, Rater, Summarizer, Thumbnailer};

/// Which (category, date) keys are rebuilt even though they have output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Force {
    #[default]
    None,
    Category(String),
    All,
}

impl Force {
    pub fn applies_to(&self, category: &str) -> bool {
        match self {
            Force::None => false,
            Force::Category(name) => name == category,
            Force::All => true,
        }
    }
}

/// The external services every stage talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub feeds: Arc<dyn FeedSource>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub rater: Arc<dyn Rater>,
    pub summarizer: Arc<dyn Summarizer>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub fetch: BatchReport,
    pub rate: BatchReport,
    pub selected: usize,
    pub summarize: BatchReport,
    pub render: BatchReport,
    pub finalized: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CategoryOutcome {
    /// Already had complete items and was not forced.
    Skipped,
    Processed(CategoryReport),
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRun {
    pub date: NaiveDate,
    pub category: String,
    pub outcome: CategoryOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub runs: Vec<CategoryRun>,
    /// Dates that could not be processed at all.
    pub failed_dates: Vec<NaiveDate>,
}

impl RunReport {
    pub fn outcome(&self, category: &str, date: NaiveDate) -> Option<&CategoryOutcome> {
        self.runs
            .iter()
            .find(|r| r.category == category && r.date == date)
            .map(|r| &r.outcome)
    }

    pub fn failed_categories(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.outcome, CategoryOutcome::Failed { .. }))
            .count()
    }
}

/// Drives every configured category through the stages, one date at a time.
pub struct Coordinator<'a> {
    config: &'a Config,
    repo: Repository,
    pool: WorkerPool,
    stats: Arc<PipelineStats>,
    collaborators: Collaborators,
}

impl<'a> Coordinator<'a> {
    pub async fn new(config: &'a Config, collaborators: Collaborators) -> Result<Self> {
        let repo = Repository::new(&config.db_path).await?;
        let stats = Arc::new(PipelineStats::new());
        let pool = WorkerPool::new(&config.db_path, config.workers, Arc::clone(&stats));
        Ok(Self {
            config,
            repo,
            pool,
            stats,
            collaborators,
        })
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// The current run date. Feed entries are placed on run dates by their
    /// UTC publication date, so the default date is UTC as well.
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Today and the `days - 1` days before it, oldest first.
    pub fn dates_back(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
        (0..days.max(1) as i64)
            .rev()
            .map(|offset| today - Duration::days(offset))
            .collect()
    }

    pub async fn run(&self, dates: &[NaiveDate], force: &Force) -> RunReport {
        let mut report = RunReport::default();
        for &date in dates {
            match self.run_date(date, force, &mut report).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(%date, error = %e, "date failed");
                    report.failed_dates.push(date);
                }
            }
        }
        report
    }

    async fn run_date(&self, date: NaiveDate, force: &Force, report: &mut RunReport) -> Result<()> {
        tracing::info!(%date, categories = self.config.categories.len(), "processing date");

        for (name, category) in &self.config.categories {
            let outcome = match self.run_category(name, category, date, force).await {
                Ok(Some(summary)) => CategoryOutcome::Processed(summary),
                Ok(None) => CategoryOutcome::Skipped,
                Err(e) => {
                    tracing::error!(category = %name, %date, error = %e, "category failed");
                    CategoryOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.runs.push(CategoryRun {
                date,
                category: name.clone(),
                outcome,
            });
        }

        if self.repo.has_complete_items(date).await? {
            let digest = build_digest(&self.repo, date).await?;
            write_digest(Path::new(&self.config.output_dir), &digest).await?;
        }
        Ok(())
    }

    /// Run one (category, date) key. `Ok(None)` means it was skipped.
    pub async fn run_category(
        &self,
        name: &str,
        category: &CategoryConfig,
        date: NaiveDate,
        force: &Force,
    ) -> Result<Option<CategoryReport>> {
        if force.applies_to(name) {
            let cleared = self.repo.clear_category_for_date(name, date).await?;
            tracing::info!(category = name, %date, cleared, "forced re-run");
        } else if self.repo.has_output(name, date).await? {
            tracing::info!(category = name, %date, "already complete, skipping");
            return Ok(None);
        }

        let feed_urls = feed_urls(category)?;
        if feed_urls.is_empty() {
            return Err(AppError::Config(format!("category '{name}' has no feeds")));
        }

        let mut summary = CategoryReport::default();

        summary.fetch = FetchStage::new(
            name,
            date,
            category.keywords.clone(),
            Arc::clone(&self.collaborators.extractor),
        )
        .run_batch(&self.pool, self.collaborators.feeds.as_ref(), &feed_urls)
        .await;

        summary.rate = RateStage::new(
            category.rating_criteria.clone(),
            Arc::clone(&self.collaborators.rater),
        )
        .run_batch(&self.pool, &self.repo, name, date)
        .await?;

        let policy = SelectionPolicy {
            top_n: self.config.top_articles_for(category),
            min_score: self.config.min_score_for(category),
        };
        summary.selected = select_for_summary(&self.repo, &self.stats, name, date, policy)
            .await?
            .len();

        summary.summarize = SummarizeStage::new(Arc::clone(&self.collaborators.summarizer))
            .run_batch(&self.pool, &self.repo, name, date)
            .await?;

        summary.render = RenderStage::new(Arc::clone(&self.collaborators.thumbnailer))
            .run_batch(&self.pool, &self.repo, name, date)
            .await?;

        if self.config.complete_without_thumbnail {
            summary.finalized = self.repo.finalize_summarized(name, date).await?;
        }

        tracing::info!(
            category = name,
            %date,
            fetched = summary.fetch.advanced,
            rated = summary.rate.advanced,
            selected = summary.selected,
            summarized = summary.summarize.advanced,
            rendered = summary.render.advanced,
            "category done"
        );
        Ok(Some(summary))
    }
}

/// Configured feed urls followed by those of the category's OPML file,
/// without duplicates.
fn feed_urls(category: &CategoryConfig) -> Result<Vec<String>> {
    let mut urls: Vec<String> = category
        .feeds
        .iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();

    if let Some(opml) = category.opml_file.as_deref() {
        urls.extend(parse_opml_file(Path::new(opml))?);
    }

    let mut seen = std::collections::HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_scope() {
        assert!(!Force::None.applies_to("News"));
        assert!(Force::All.applies_to("News"));
        assert!(Force::Category("News".into()).applies_to("News"));
        assert!(!Force::Category("News".into()).applies_to("Research"));
    }

    #[test]
    fn dates_back_ends_today_oldest_first() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let dates = Coordinator::dates_back(today, 3);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                today,
            ]
        );
        assert_eq!(Coordinator::dates_back(today, 0), vec![today]);
    }

    #[test]
    fn today_is_the_utc_date() {
        let before = Utc::now().date_naive();
        let today = Coordinator::today();
        let after = Utc::now().date_naive();
        assert!(today == before || today == after);
    }

    #[test]
    fn feed_urls_merge_opml_without_duplicates() {
        let dir = tempfile::TempDir::new().unwrap();
        let opml = dir.path().join("feeds.opml");
        std::fs::write(
            &opml,
            r#"<?xml version="1.0"?>
<opml version="2.0"><head><title>t</title></head><body>
  <outline text="a" xmlUrl="https://a.example.com/feed"/>
  <outline text="b" xmlUrl="https://b.example.com/feed"/>
</body></opml>"#,
        )
        .unwrap();

        let category = CategoryConfig {
            feeds: vec!["https://a.example.com/feed".into(), " ".into()],
            opml_file: Some(opml.to_string_lossy().to_string()),
            ..Default::default()
        };
        assert_eq!(
            feed_urls(&category).unwrap(),
            vec!["https://a.example.com/feed", "https://b.example.com/feed"]
        );
    }
}
