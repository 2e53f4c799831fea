use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Where an item sits in the pipeline. The stored string form is the
/// snake_case variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Fetched,
    Rated,
    SelectedForSummary,
    Summarized,
    Complete,
    Failed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        ItemStatus::Fetched,
        ItemStatus::Rated,
        ItemStatus::SelectedForSummary,
        ItemStatus::Summarized,
        ItemStatus::Complete,
        ItemStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Fetched => "fetched",
            ItemStatus::Rated => "rated",
            ItemStatus::SelectedForSummary => "selected_for_summary",
            ItemStatus::Summarized => "summarized",
            ItemStatus::Complete => "complete",
            ItemStatus::Failed => "failed",
        }
    }

    /// The single happy-path successor, if any.
    pub fn next(&self) -> Option<ItemStatus> {
        match self {
            ItemStatus::Fetched => Some(ItemStatus::Rated),
            ItemStatus::Rated => Some(ItemStatus::SelectedForSummary),
            ItemStatus::SelectedForSummary => Some(ItemStatus::Summarized),
            ItemStatus::Summarized => Some(ItemStatus::Complete),
            ItemStatus::Complete | ItemStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Complete | ItemStatus::Failed)
    }

    /// Forward edge, or a finalization jump out of a non-terminal state.
    pub fn can_advance_to(&self, target: ItemStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            ItemStatus::Failed | ItemStatus::Complete => true,
            other => self.next() == Some(other),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::InvalidStatus(s.to_string()))
    }
}

impl ToSql for ItemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: AppError| FromSqlError::Other(e.to_string().into()))
    }
}

/// A tracked content item, one row of the `items` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub publication_date: String,
    pub fetch_date: NaiveDate,
    pub category: String,
    pub source: Option<String>,
    pub content: Option<String>,
    pub score: Option<f64>,
    pub rating_reason: Option<String>,
    pub chinese_title: Option<String>,
    pub english_summary: Option<String>,
    pub chinese_summary: Option<String>,
    pub thumbnail_path: Option<String>,
    pub status: ItemStatus,
}

/// Payload handed to the store by the fetch stage.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub url: String,
    pub title: String,
    pub publication_date: String,
    pub fetch_date: NaiveDate,
    pub category: String,
    pub content: String,
}

impl NewItem {
    /// Host of the item URL with any leading `www.` removed.
    pub fn source(&self) -> Option<String> {
        source_from_url(&self.url)
    }
}

pub fn source_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub chinese_title: Option<String>,
    pub english_summary: Option<String>,
    pub chinese_summary: Option<String>,
}

impl SummaryPayload {
    pub fn is_empty(&self) -> bool {
        [&self.chinese_title, &self.english_summary, &self.chinese_summary]
            .iter()
            .all(|field| field.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

pub fn clamp_score(score: f64) -> f64 {
    score.clamp(MIN_SCORE, MAX_SCORE)
}
