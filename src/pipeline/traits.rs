//! Seams between the pipeline and the outside world.
//!
//! Every stage talks to its external collaborator through one of these
//! traits, so the stages can be driven by the real HTTP/LLM clients or by
//! in-process fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::feed::FeedEntry;
use crate::models::{Item, Rating, SummaryPayload};

/// Lists the entries currently published by a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>>;
}

/// Turns an item url into readable text. `Ok(None)` means the page had
/// nothing worth keeping.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<Option<String>>;
}

/// Scores an item against a category's criteria. `Ok(None)` means the
/// item does not match the criteria at all.
#[async_trait]
pub trait Rater: Send + Sync {
    async fn rate(&self, criteria: &str, title: &str, content: &str) -> Result<Option<Rating>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, content: &str) -> Result<SummaryPayload>;
}

/// Produces a local thumbnail for a summarized item, if one can be found.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn thumbnail(&self, item: &Item) -> Result<Option<String>>;
}
