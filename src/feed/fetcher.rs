use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;

use crate::error::Result;
use crate::pipeline::FeedSource;

/// One entry as listed by a feed, before its page is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub url: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("content-digest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        parse_entries(&bytes)
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>> {
        self.fetch_feed(feed_url).await
    }
}

/// Parse RSS/Atom bytes into entries. Entries without a link are dropped.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<FeedEntry>> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone())?;
            Some(FeedEntry {
                url,
                title: entry
                    .title
                    .map(|t| t.content.trim().to_string())
                    .unwrap_or_default(),
                published: entry.published.or(entry.updated),
            })
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <description>Example feed</description>
    <item>
      <title>First post</title>
      <link>https://example.com/first</link>
      <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <pubDate>Wed, 01 May 2024 11:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated</title>
      <link>https://example.com/undated</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_entries_with_links() {
        let entries = parse_entries(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/first");
        assert_eq!(entries[0].title, "First post");
        assert_eq!(
            entries[0].published.map(|d| d.date_naive().to_string()).as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(entries[1].published, None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_entries(b"definitely not xml").is_err());
    }
}
