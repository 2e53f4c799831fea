pub const SCHEMA: &str = r#"
-- items table: one row per discovered url, status drives the pipeline
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    publication_date TEXT NOT NULL,
    fetch_date TEXT NOT NULL,
    category TEXT NOT NULL,
    source TEXT,
    content TEXT,
    score REAL,
    rating_reason TEXT,
    chinese_title TEXT,
    english_summary TEXT,
    chinese_summary TEXT,
    thumbnail_path TEXT,
    status TEXT NOT NULL DEFAULT 'fetched'
        CHECK (status IN ('fetched', 'rated', 'selected_for_summary', 'summarized', 'complete', 'failed')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_items_batch ON items(status, category, fetch_date);
CREATE INDEX IF NOT EXISTS idx_items_fetch_date ON items(fetch_date);
"#;

pub const ITEM_COLUMNS: &str = "id, url, title, publication_date, fetch_date, category, source, content, \
     score, rating_reason, chinese_title, english_summary, chinese_summary, thumbnail_path, status";
