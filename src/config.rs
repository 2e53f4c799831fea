use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const APP_DIR: &str = "content-digest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    pub api_key: Option<String>,

    #[serde(default = "default_rating_model")]
    pub rating_model: String,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Worker pool size for every stage.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_top_articles")]
    pub top_articles: usize,

    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// How many run dates (ending today) a plain `run` covers.
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Mark summarized items complete even when no thumbnail was produced.
    #[serde(default = "default_true")]
    pub complete_without_thumbnail: bool,

    #[serde(default)]
    pub categories: BTreeMap<String, CategoryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryConfig {
    #[serde(default)]
    pub rating_criteria: String,

    #[serde(default)]
    pub feeds: Vec<String>,

    /// OPML file whose `xmlUrl` outlines are added to `feeds`.
    pub opml_file: Option<String>,

    /// When non-empty, items whose content mentions none of these are dropped.
    #[serde(default)]
    pub keywords: Vec<String>,

    pub top_articles: Option<usize>,
    pub min_score: Option<f64>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_db_path() -> String {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("items.db").to_string_lossy().to_string()
}

fn default_output_dir() -> String {
    data_dir().join("output").to_string_lossy().to_string()
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_rating_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_summary_model() -> String {
    "gpt-4o".to_string()
}

fn default_workers() -> usize {
    10
}

fn default_top_articles() -> usize {
    5
}

fn default_min_score() -> f64 {
    6.5
}

fn default_days_back() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            output_dir: default_output_dir(),
            api_url: default_api_url(),
            api_key: None,
            rating_model: default_rating_model(),
            summary_model: default_summary_model(),
            workers: default_workers(),
            top_articles: default_top_articles(),
            min_score: default_min_score(),
            days_back: default_days_back(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            complete_without_thumbnail: true,
            categories: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`. A missing
    /// file at the default location is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    Self::from_file(&config_path)?
                } else {
                    let config = Config::default();
                    config.save(&config_path)?;
                    config
                }
            }
        };

        if config.api_key.is_none() {
            config.api_key = std::env::var("API_KEY").ok().filter(|k| !k.is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AppError::Config("workers must be at least 1".into()));
        }
        if self.top_articles == 0 {
            return Err(AppError::Config("top_articles must be at least 1".into()));
        }
        Ok(())
    }

    pub fn category(&self, name: &str) -> Result<&CategoryConfig> {
        self.categories
            .get(name)
            .ok_or_else(|| AppError::Config(format!("unknown category '{name}'")))
    }

    pub fn top_articles_for(&self, category: &CategoryConfig) -> usize {
        category.top_articles.unwrap_or(self.top_articles)
    }

    pub fn min_score_for(&self, category: &CategoryConfig) -> f64 {
        category.min_score.unwrap_or(self.min_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gets_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.workers, 10);
        assert_eq!(config.top_articles, 5);
        assert_eq!(config.min_score, 6.5);
        assert_eq!(config.days_back, 3);
        assert!(config.complete_without_thumbnail);
        assert!(config.categories.is_empty());
    }

    #[test]
    fn category_overrides_global_selection_policy() {
        let config = Config::from_toml(
            r#"
            top_articles = 8
            min_score = 6.0

            [categories.News]
            rating_criteria = "world news"
            feeds = ["https://example.com/rss"]
            top_articles = 2
            min_score = 7.5

            [categories.Tech]
            feeds = ["https://example.org/atom"]
            "#,
        )
        .unwrap();

        let news = config.category("News").unwrap();
        assert_eq!(config.top_articles_for(news), 2);
        assert_eq!(config.min_score_for(news), 7.5);

        let tech = config.category("Tech").unwrap();
        assert_eq!(config.top_articles_for(tech), 8);
        assert_eq!(config.min_score_for(tech), 6.0);

        assert!(config.category("Sports").is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = Config::from_toml("workers = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load_keeps_categories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.categories.insert(
            "News".into(),
            CategoryConfig {
                feeds: vec!["https://example.com/rss".into()],
                ..Default::default()
            },
        );
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.categories["News"].feeds, vec!["https://example.com/rss"]);
    }
}
