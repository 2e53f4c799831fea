use chrono::NaiveDate;

use crate::db::Repository;
use crate::error::Result;

use super::stats::{PipelineStats, StageKind};

/// How many items of a batch go on to be summarized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    pub top_n: usize,
    pub min_score: f64,
}

/// `rated -> selected_for_summary` for the best items of one batch: rank by
/// score, keep at most `top_n`, and only those scoring `min_score` or more.
pub async fn select_for_summary(
    repo: &Repository,
    stats: &PipelineStats,
    category: &str,
    date: NaiveDate,
    policy: SelectionPolicy,
) -> Result<Vec<i64>> {
    let stage = stats.stage(StageKind::Select);
    stage.batches.inc();

    let selected = repo
        .select_top_for_summary(category, date, policy.top_n, policy.min_score)
        .await?;

    stage.advanced.add(selected.len() as u64);
    tracing::info!(
        category,
        %date,
        selected = selected.len(),
        top_n = policy.top_n,
        min_score = policy.min_score,
        "selected items for summary"
    );
    Ok(selected)
}
