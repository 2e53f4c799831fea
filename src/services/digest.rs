//! Per-day export of everything the pipeline finished for a date.

use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::Repository;
use crate::error::Result;
use crate::models::Item;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub source: Option<String>,
    pub score: Option<f64>,
    pub chinese_title: Option<String>,
    pub english_summary: Option<String>,
    pub chinese_summary: Option<String>,
    pub thumbnail: Option<String>,
}

impl From<Item> for DigestEntry {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            url: item.url,
            title: item.title,
            source: item.source,
            score: item.score,
            chinese_title: item.chinese_title,
            english_summary: item.english_summary,
            chinese_summary: item.chinese_summary,
            thumbnail: item.thumbnail_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub date: NaiveDate,
    /// Category name to entries, best score first.
    pub categories: BTreeMap<String, Vec<DigestEntry>>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.categories.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    /// One title and link per entry, blank line between entries.
    pub fn titles_and_links(&self) -> String {
        let mut out = String::new();
        for entry in self.categories.values().flatten() {
            let title = entry.chinese_title.as_deref().unwrap_or(&entry.title);
            let _ = writeln!(out, "{title}\n{}\n", entry.url);
        }
        out
    }
}

pub async fn build_digest(repo: &Repository, date: NaiveDate) -> Result<Digest> {
    let categories = repo
        .summarized_items_for_date(date)
        .await?
        .into_iter()
        .map(|(category, items)| (category, items.into_iter().map(DigestEntry::from).collect()))
        .collect();
    Ok(Digest { date, categories })
}

/// Write `digest.json` and `titles_and_links.txt` under `<output_dir>/<date>/`
/// and return the directory.
pub async fn write_digest(output_dir: &Path, digest: &Digest) -> Result<PathBuf> {
    let dir = output_dir.join(digest.date.format("%Y-%m-%d").to_string());
    tokio::fs::create_dir_all(&dir).await?;

    let json = serde_json::to_string_pretty(digest)?;
    tokio::fs::write(dir.join("digest.json"), json).await?;
    tokio::fs::write(dir.join("titles_and_links.txt"), digest.titles_and_links()).await?;

    tracing::info!(
        date = %digest.date,
        entries = digest.len(),
        dir = %dir.display(),
        "digest written"
    );
    Ok(dir)
}
