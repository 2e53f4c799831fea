use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Item, ItemStatus, NewItem, Rating, SummaryPayload};

use super::schema::{ITEM_COLUMNS, SCHEMA};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Statuses `finalize_stuck_items` fails.
const STUCK: [ItemStatus; 2] = [ItemStatus::Fetched, ItemStatus::Rated];

/// Statuses `force_finalize_all` completes.
const IN_FLIGHT: [ItemStatus; 3] = [
    ItemStatus::Rated,
    ItemStatus::SelectedForSummary,
    ItemStatus::Summarized,
];

/// Handle on the item store. Each handle owns one SQLite connection that
/// lives on its own background thread; clone the path, not the handle,
/// when another worker needs access.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    /// Open the store and create the schema if needed.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let repo = Self::connect(db_path).await?;

        repo.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        Ok(repo)
    }

    /// Open an extra connection to an already initialized store.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).await?;

        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Fetch stage

    /// Insert a freshly fetched item. Returns `false` when the url is
    /// already known, in which case nothing is written.
    pub async fn insert_item(&self, item: NewItem) -> Result<bool> {
        let source = item.source();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT OR IGNORE INTO items
                           (url, title, publication_date, fetch_date, category, content, source, status)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    params![
                        item.url,
                        item.title,
                        item.publication_date,
                        date_key(item.fetch_date),
                        item.category,
                        item.content,
                        source,
                        ItemStatus::Fetched,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    // Batch reads

    pub async fn items_by_status(
        &self,
        status: ItemStatus,
        category: &str,
        date: NaiveDate,
    ) -> Result<Vec<Item>> {
        let category = category.to_string();
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items
                     WHERE status = ?1 AND category = ?2 AND fetch_date = ?3
                     ORDER BY id"
                ))?;
                let items = stmt
                    .query_map(params![status, category, date_key(date)], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let item = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"))?;
                let item = stmt.query_row(params![id], item_from_row).optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    // Stage transitions. Each one is a single UPDATE guarded by the
    // previous status, so a row only ever moves once per edge.

    /// `fetched -> rated`. A `None` rating means the item was judged not
    /// relevant; it is still advanced, with no score.
    pub async fn record_rating(&self, id: i64, rating: Option<Rating>) -> Result<bool> {
        let (score, reason) = match rating {
            Some(r) => (Some(r.score), r.reason),
            None => (None, "not relevant".to_string()),
        };
        let (from, to) = edge(ItemStatus::Fetched)?;
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE items
                       SET score = ?1, rating_reason = ?2, status = ?3, updated_at = datetime('now')
                       WHERE id = ?4 AND status = ?5"#,
                    params![score, reason, to, id, from],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    /// `rated -> selected_for_summary` for the best-scoring items of a
    /// batch. Items already selected (or further along) for the same key
    /// count against `top_n`, so repeated calls never exceed it.
    pub async fn select_top_for_summary(
        &self,
        category: &str,
        date: NaiveDate,
        top_n: usize,
        min_score: f64,
    ) -> Result<Vec<i64>> {
        let category = category.to_string();
        let (from, to) = edge(ItemStatus::Rated)?;
        let promoted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let date = date_key(date);

                let already: i64 = tx.query_row(
                    r#"SELECT COUNT(*) FROM items
                       WHERE category = ?1 AND fetch_date = ?2 AND status IN (?3, ?4, ?5)"#,
                    params![
                        category,
                        date,
                        ItemStatus::SelectedForSummary,
                        ItemStatus::Summarized,
                        ItemStatus::Complete,
                    ],
                    |row| row.get(0),
                )?;
                let remaining = top_n as i64 - already;
                if remaining <= 0 {
                    tx.commit()?;
                    return Ok(Vec::new());
                }

                let candidates = {
                    let mut stmt = tx.prepare(
                        r#"SELECT id FROM items
                           WHERE status = ?1 AND category = ?2 AND fetch_date = ?3
                             AND score IS NOT NULL AND score >= ?4
                           ORDER BY score DESC, id ASC
                           LIMIT ?5"#,
                    )?;
                    let ids = stmt
                        .query_map(
                            params![from, category, date, min_score, remaining],
                            |row| row.get::<_, i64>(0),
                        )?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    ids
                };

                let mut promoted = Vec::with_capacity(candidates.len());
                for id in candidates {
                    let changed = tx.execute(
                        r#"UPDATE items SET status = ?1, updated_at = datetime('now')
                           WHERE id = ?2 AND status = ?3"#,
                        params![to, id, from],
                    )?;
                    if changed > 0 {
                        promoted.push(id);
                    }
                }
                tx.commit()?;
                Ok(promoted)
            })
            .await?;
        Ok(promoted)
    }

    /// `selected_for_summary -> summarized`.
    pub async fn record_summary(&self, id: i64, summary: SummaryPayload) -> Result<bool> {
        let (from, to) = edge(ItemStatus::SelectedForSummary)?;
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE items
                       SET chinese_title = ?1, english_summary = ?2, chinese_summary = ?3,
                           status = ?4, updated_at = datetime('now')
                       WHERE id = ?5 AND status = ?6"#,
                    params![
                        summary.chinese_title,
                        summary.english_summary,
                        summary.chinese_summary,
                        to,
                        id,
                        from,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    /// `summarized -> complete`.
    pub async fn record_thumbnail(&self, id: i64, thumbnail_path: Option<String>) -> Result<bool> {
        let (from, to) = edge(ItemStatus::Summarized)?;
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE items
                       SET thumbnail_path = ?1, status = ?2, updated_at = datetime('now')
                       WHERE id = ?3 AND status = ?4"#,
                    params![thumbnail_path, to, id, from],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    // Finalization and operator resets

    /// Mark every `summarized` item of a batch complete, thumbnail or not.
    pub async fn finalize_summarized(&self, category: &str, date: NaiveDate) -> Result<usize> {
        let owned = category.to_string();
        let (from, to) = edge(ItemStatus::Summarized)?;
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    r#"UPDATE items SET status = ?1, updated_at = datetime('now')
                       WHERE status = ?2 AND category = ?3 AND fetch_date = ?4"#,
                    params![to, from, owned, date_key(date)],
                )?;
                Ok(updated)
            })
            .await?;
        if updated > 0 {
            tracing::info!(updated, category, %date, "finalized summarized items");
        }
        Ok(updated)
    }

    /// Fail items of `category` left in `fetched` or `rated` by runs before
    /// `before`. Those runs will never query them again.
    pub async fn finalize_stuck_items(&self, category: &str, before: NaiveDate) -> Result<usize> {
        let category = category.to_string();
        check_jump(&STUCK, ItemStatus::Failed)?;
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    r#"UPDATE items SET status = ?1, updated_at = datetime('now')
                       WHERE category = ?2 AND fetch_date < ?3 AND status IN (?4, ?5)"#,
                    params![
                        ItemStatus::Failed,
                        category,
                        date_key(before),
                        STUCK[0],
                        STUCK[1],
                    ],
                )?;
                Ok(updated)
            })
            .await?;
        Ok(updated)
    }

    /// Force every item stuck mid-pipeline, on any date, to `complete`.
    pub async fn force_finalize_all(&self) -> Result<usize> {
        check_jump(&IN_FLIGHT, ItemStatus::Complete)?;
        let updated = self
            .conn
            .call(|conn| {
                let updated = conn.execute(
                    r#"UPDATE items SET status = ?1, updated_at = datetime('now')
                       WHERE status IN (?2, ?3, ?4)"#,
                    params![
                        ItemStatus::Complete,
                        IN_FLIGHT[0],
                        IN_FLIGHT[1],
                        IN_FLIGHT[2],
                    ],
                )?;
                Ok(updated)
            })
            .await?;
        tracing::info!(updated, "force-finalized items");
        Ok(updated)
    }

    pub async fn clear_category_for_date(&self, category: &str, date: NaiveDate) -> Result<usize> {
        let category = category.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM items WHERE category = ?1 AND fetch_date = ?2",
                    params![category, date_key(date)],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    // Aggregate reads

    /// True once a run for `date` produced at least one complete item.
    pub async fn has_complete_items(&self, date: NaiveDate) -> Result<bool> {
        let exists = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM items WHERE fetch_date = ?1 AND status = ?2 LIMIT 1",
                        params![date_key(date), ItemStatus::Complete],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(exists)
    }

    /// True when the (category, date) batch already shows terminal output.
    pub async fn has_output(&self, category: &str, date: NaiveDate) -> Result<bool> {
        let category = category.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        r#"SELECT 1 FROM items
                           WHERE category = ?1 AND fetch_date = ?2 AND status = ?3 LIMIT 1"#,
                        params![category, date_key(date), ItemStatus::Complete],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(exists)
    }

    /// Item count per status for one batch, every status present.
    pub async fn status_counts(
        &self,
        category: &str,
        date: NaiveDate,
    ) -> Result<BTreeMap<ItemStatus, usize>> {
        let category = category.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT status, COUNT(*) FROM items
                       WHERE category = ?1 AND fetch_date = ?2
                       GROUP BY status"#,
                )?;
                let rows = stmt
                    .query_map(params![category, date_key(date)], |row| {
                        Ok((row.get::<_, ItemStatus>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(fill_counts(rows))
    }

    /// Item count per status across the whole store.
    pub async fn total_status_counts(&self) -> Result<BTreeMap<ItemStatus, usize>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM items GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, ItemStatus>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(fill_counts(rows))
    }

    /// Summarized or complete items of a date with a Chinese summary,
    /// grouped by category and ordered by score, best first.
    pub async fn summarized_items_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<Item>>> {
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items
                     WHERE fetch_date = ?1 AND status IN (?2, ?3)
                       AND chinese_summary IS NOT NULL AND chinese_summary != ''
                     ORDER BY category, score DESC, id"
                ))?;
                let items = stmt
                    .query_map(
                        params![date_key(date), ItemStatus::Complete, ItemStatus::Summarized],
                        item_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;

        let mut grouped: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for item in items {
            grouped.entry(item.category.clone()).or_default().push(item);
        }
        Ok(grouped)
    }

    pub async fn summarized_items_for_category(
        &self,
        category: &str,
        date: NaiveDate,
    ) -> Result<Vec<Item>> {
        let mut grouped = self.summarized_items_for_date(date).await?;
        Ok(grouped.remove(category).unwrap_or_default())
    }

    /// Dates that have displayable output, newest first.
    pub async fn available_dates(&self) -> Result<Vec<NaiveDate>> {
        let dates = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT fetch_date FROM items
                       WHERE status IN (?1, ?2)
                         AND chinese_summary IS NOT NULL AND chinese_summary != ''
                       ORDER BY fetch_date DESC"#,
                )?;
                let dates = stmt
                    .query_map(
                        params![ItemStatus::Complete, ItemStatus::Summarized],
                        |row| parse_date_column(row, 0),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(dates)
            })
            .await?;
        Ok(dates)
    }
}

/// The forward edge out of `from`, as `(from, to)`.
fn edge(from: ItemStatus) -> Result<(ItemStatus, ItemStatus)> {
    let to = from
        .next()
        .ok_or_else(|| AppError::InvalidStatus(format!("{from} has no successor")))?;
    Ok((from, to))
}

fn check_jump(sources: &[ItemStatus], target: ItemStatus) -> Result<()> {
    match sources.iter().find(|s| !s.can_advance_to(target)) {
        Some(s) => Err(AppError::InvalidStatus(format!("{s} cannot move to {target}"))),
        None => Ok(()),
    }
}

pub(crate) fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn fill_counts(rows: Vec<(ItemStatus, i64)>) -> BTreeMap<ItemStatus, usize> {
    let mut counts: BTreeMap<ItemStatus, usize> =
        ItemStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for (status, count) in rows {
        counts.insert(status, count.max(0) as usize);
    }
    counts
}

fn parse_date_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        publication_date: row.get(3)?,
        fetch_date: parse_date_column(row, 4)?,
        category: row.get(5)?,
        source: row.get(6)?,
        content: row.get(7)?,
        score: row.get(8)?,
        rating_reason: row.get(9)?,
        chinese_title: row.get(10)?,
        english_summary: row.get(11)?,
        chinese_summary: row.get(12)?,
        thumbnail_path: row.get(13)?,
        status: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_item(url: &str, category: &str, fetch_date: NaiveDate) -> NewItem {
        NewItem {
            url: url.to_string(),
            title: format!("Title for {url}"),
            publication_date: date_key(fetch_date),
            fetch_date,
            category: category.to_string(),
            content: "body".to_string(),
        }
    }

    async fn open_store() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::new(dir.path().join("items.db")).await.unwrap();
        (dir, repo)
    }

    async fn seed_rated(
        repo: &Repository,
        category: &str,
        date: NaiveDate,
        scores: &[f64],
    ) -> Vec<i64> {
        let mut ids = Vec::new();
        for (i, score) in scores.iter().enumerate() {
            let url = format!("https://example.com/{category}/{i}");
            assert!(repo.insert_item(new_item(&url, category, date)).await.unwrap());
            let id = repo
                .items_by_status(ItemStatus::Fetched, category, date)
                .await
                .unwrap()
                .into_iter()
                .find(|item| item.url == url)
                .unwrap()
                .id;
            let rating = Rating {
                score: *score,
                reason: "ok".into(),
            };
            assert!(repo.record_rating(id, Some(rating)).await.unwrap());
            ids.push(id);
        }
        ids
    }

    #[test]
    fn edges_follow_the_status_order() {
        let (from, to) = edge(ItemStatus::Fetched).unwrap();
        assert_eq!((from, to), (ItemStatus::Fetched, ItemStatus::Rated));
        assert_eq!(edge(ItemStatus::Summarized).unwrap().1, ItemStatus::Complete);
        assert!(matches!(edge(ItemStatus::Complete), Err(AppError::InvalidStatus(_))));
        assert!(edge(ItemStatus::Failed).is_err());

        assert!(check_jump(&STUCK, ItemStatus::Failed).is_ok());
        assert!(check_jump(&IN_FLIGHT, ItemStatus::Complete).is_ok());
        assert!(check_jump(&[ItemStatus::Complete], ItemStatus::Failed).is_err());
    }

    #[tokio::test]
    async fn duplicate_url_is_ignored() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");

        let item = || new_item("https://www.example.com/a", "News", date);
        assert!(repo.insert_item(item()).await.unwrap());
        assert!(!repo.insert_item(item()).await.unwrap());

        let items = repo.items_by_status(ItemStatus::Fetched, "News", date).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source.as_deref(), Some("example.com"));
        assert_eq!(items[0].status, ItemStatus::Fetched);
    }

    #[tokio::test]
    async fn batch_reads_are_scoped_by_fetch_date() {
        let (_dir, repo) = open_store().await;
        let old = new_item("https://example.com/old", "News", day("2024-05-01"));
        let new = new_item("https://example.com/new", "News", day("2024-05-02"));
        repo.insert_item(old).await.unwrap();
        repo.insert_item(new).await.unwrap();

        let items = repo
            .items_by_status(ItemStatus::Fetched, "News", day("2024-05-02"))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://example.com/new");
    }

    #[tokio::test]
    async fn transitions_only_move_forward_once() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        let ids = seed_rated(&repo, "News", date, &[8.0]).await;
        let id = ids[0];

        // already rated: a second rating must not touch the row
        let again = Rating {
            score: 2.0,
            reason: "late".into(),
        };
        assert!(!repo.record_rating(id, Some(again)).await.unwrap());
        assert_eq!(repo.get_item(id).await.unwrap().unwrap().score, Some(8.0));

        // cannot skip selection
        assert!(!repo.record_summary(id, SummaryPayload::default()).await.unwrap());
        assert!(!repo.record_thumbnail(id, None).await.unwrap());
        assert_eq!(repo.get_item(id).await.unwrap().unwrap().status, ItemStatus::Rated);

        assert_eq!(repo.select_top_for_summary("News", date, 5, 6.5).await.unwrap(), vec![id]);
        let summary = SummaryPayload {
            chinese_title: Some("标题".into()),
            english_summary: Some("summary".into()),
            chinese_summary: Some("摘要".into()),
        };
        assert!(repo.record_summary(id, summary.clone()).await.unwrap());
        assert!(!repo.record_summary(id, summary).await.unwrap());
        assert!(repo.record_thumbnail(id, Some("thumbs/a.jpg".into())).await.unwrap());

        let item = repo.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Complete);
        assert_eq!(item.thumbnail_path.as_deref(), Some("thumbs/a.jpg"));
    }

    #[tokio::test]
    async fn irrelevant_items_are_rated_without_score() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        repo.insert_item(new_item("https://example.com/x", "News", date)).await.unwrap();
        let id = repo.items_by_status(ItemStatus::Fetched, "News", date).await.unwrap()[0].id;

        assert!(repo.record_rating(id, None).await.unwrap());
        let item = repo.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Rated);
        assert_eq!(item.score, None);
        assert_eq!(item.rating_reason.as_deref(), Some("not relevant"));

        assert!(repo.items_by_status(ItemStatus::Fetched, "News", date).await.unwrap().is_empty());
        assert!(repo.select_top_for_summary("News", date, 5, 1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn selection_enforces_rank_and_threshold() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        let ids = seed_rated(&repo, "News", date, &[9.0, 8.0, 7.0, 5.0]).await;

        let selected = repo.select_top_for_summary("News", date, 2, 6.5).await.unwrap();
        assert_eq!(selected, vec![ids[0], ids[1]]);

        // a second pass for the same key has no budget left
        assert!(repo.select_top_for_summary("News", date, 2, 6.5).await.unwrap().is_empty());

        let counts = repo.status_counts("News", date).await.unwrap();
        assert_eq!(counts[&ItemStatus::SelectedForSummary], 2);
        assert_eq!(counts[&ItemStatus::Rated], 2);
    }

    #[tokio::test]
    async fn selection_never_exceeds_qualifying_items() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        seed_rated(&repo, "Tech", date, &[6.0, 9.5, 3.0]).await;

        let selected = repo.select_top_for_summary("Tech", date, 10, 6.5).await.unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        let ids = seed_rated(&repo, "News", date, &[7.0, 7.0, 7.0]).await;

        let selected = repo.select_top_for_summary("News", date, 2, 6.5).await.unwrap();
        assert_eq!(selected, vec![ids[0], ids[1]]);
    }

    #[tokio::test]
    async fn force_finalize_moves_intermediate_states_to_complete() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        // 10 items: 4 complete, 3 summarized, 1 selected, 2 rated
        let scores = [10.0, 9.9, 9.8, 9.7, 9.6, 9.5, 9.4, 9.3, 1.0, 1.0];
        let ids = seed_rated(&repo, "News", date, &scores).await;
        let selected = repo.select_top_for_summary("News", date, 8, 5.0).await.unwrap();
        assert_eq!(selected.len(), 8);
        for id in &ids[..7] {
            repo.record_summary(*id, SummaryPayload::default()).await.unwrap();
        }
        for id in &ids[..4] {
            repo.record_thumbnail(*id, None).await.unwrap();
        }

        let before = repo.status_counts("News", date).await.unwrap();
        assert_eq!(before[&ItemStatus::Rated], 2);
        assert_eq!(before[&ItemStatus::SelectedForSummary], 1);
        assert_eq!(before[&ItemStatus::Summarized], 3);
        assert_eq!(before[&ItemStatus::Complete], 4);

        assert_eq!(repo.force_finalize_all().await.unwrap(), 6);
        let after = repo.total_status_counts().await.unwrap();
        assert_eq!(after[&ItemStatus::Complete], 10);
        assert_eq!(after.values().sum::<usize>(), 10);

        // idempotent
        assert_eq!(repo.force_finalize_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stuck_items_of_older_runs_fail() {
        let (_dir, repo) = open_store().await;
        let old = day("2024-05-01");
        let today = day("2024-05-03");
        repo.insert_item(new_item("https://example.com/old-fetched", "News", old)).await.unwrap();
        seed_rated(&repo, "News", old, &[4.0]).await;
        repo.insert_item(new_item("https://example.com/other", "Tech", old)).await.unwrap();
        repo.insert_item(new_item("https://example.com/today", "News", today)).await.unwrap();

        assert_eq!(repo.finalize_stuck_items("News", today).await.unwrap(), 2);
        assert_eq!(repo.finalize_stuck_items("News", today).await.unwrap(), 0);

        assert_eq!(repo.status_counts("News", old).await.unwrap()[&ItemStatus::Failed], 2);
        assert_eq!(repo.status_counts("Tech", old).await.unwrap()[&ItemStatus::Fetched], 1);
        assert_eq!(repo.status_counts("News", today).await.unwrap()[&ItemStatus::Fetched], 1);
    }

    #[tokio::test]
    async fn clearing_a_batch_only_touches_that_key() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        seed_rated(&repo, "News", date, &[8.0, 7.0]).await;
        seed_rated(&repo, "Tech", date, &[8.0]).await;

        assert_eq!(repo.clear_category_for_date("News", date).await.unwrap(), 2);
        assert_eq!(repo.status_counts("News", date).await.unwrap().values().sum::<usize>(), 0);
        assert_eq!(repo.status_counts("Tech", date).await.unwrap()[&ItemStatus::Rated], 1);
    }

    #[tokio::test]
    async fn aggregate_reads_group_by_category_best_first() {
        let (_dir, repo) = open_store().await;
        let date = day("2024-05-02");
        let news = seed_rated(&repo, "News", date, &[7.0, 9.0]).await;
        let tech = seed_rated(&repo, "Tech", date, &[8.0]).await;
        repo.select_top_for_summary("News", date, 5, 6.5).await.unwrap();
        repo.select_top_for_summary("Tech", date, 5, 6.5).await.unwrap();
        for id in news.iter().chain(tech.iter()) {
            let payload = SummaryPayload {
                chinese_summary: Some(format!("摘要 {id}")),
                ..Default::default()
            };
            repo.record_summary(*id, payload).await.unwrap();
        }
        repo.record_thumbnail(news[0], None).await.unwrap();

        assert!(!repo.has_output("Tech", date).await.unwrap());
        assert!(repo.has_output("News", date).await.unwrap());
        assert!(repo.has_complete_items(date).await.unwrap());

        let grouped = repo.summarized_items_for_date(date).await.unwrap();
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["News", "Tech"]);
        let scores: Vec<_> = grouped["News"].iter().map(|i| i.score).collect();
        assert_eq!(scores, vec![Some(9.0), Some(7.0)]);

        assert_eq!(repo.summarized_items_for_category("Tech", date).await.unwrap().len(), 1);
        assert_eq!(repo.available_dates().await.unwrap(), vec![date]);
    }

    #[tokio::test]
    async fn separate_connections_share_the_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.db");
        let writer = Repository::new(&path).await.unwrap();
        let reader = Repository::connect(&path).await.unwrap();
        let date = day("2024-05-02");

        writer.insert_item(new_item("https://example.com/shared", "News", date)).await.unwrap();
        let seen = reader.items_by_status(ItemStatus::Fetched, "News", date).await.unwrap();
        assert_eq!(seen.len(), 1);
    }
}
