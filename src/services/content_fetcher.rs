use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;

use crate::error::Result;
use crate::pipeline::ContentExtractor;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Pages shorter than this after extraction are treated as empty.
const MIN_CONTENT_CHARS: usize = 200;

pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch a page and return its readable text.
    pub async fn fetch_full_content(&self, article_url: &str) -> Result<Option<String>> {
        let url = normalize_url(article_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", url, response.status());
            return Ok(None);
        }

        let html = response.text().await?;

        Ok(extract_content(&html))
    }
}

#[async_trait]
impl ContentExtractor for ContentFetcher {
    async fn extract(&self, url: &str) -> Result<Option<String>> {
        self.fetch_full_content(url).await
    }
}

/// Give scheme-less links a scheme so they can be requested.
pub fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("http://{rest}")
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Extract readable content from HTML using html2text
pub fn extract_content(html: &str) -> Option<String> {
    let text = match html2text::from_read(html.as_bytes(), 80) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    // Clean up the text - remove excessive whitespace
    let cleaned: String = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.chars().count() > MIN_CONTENT_CHARS {
        Some(cleaned)
    } else {
        tracing::debug!("Extracted content too short ({} chars)", cleaned.len());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_get_a_scheme() {
        assert_eq!(normalize_url("//cdn.example.com/a"), "http://cdn.example.com/a");
        assert_eq!(normalize_url("example.com/a"), "http://example.com/a");
        assert_eq!(normalize_url("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn short_pages_are_dropped() {
        assert_eq!(extract_content("<html><body><p>tiny</p></body></html>"), None);
    }

    #[test]
    fn long_pages_are_flattened_to_text() {
        let paragraph = "Rust makes concurrent pipelines pleasant to write. ".repeat(10);
        let html = format!(
            "<html><body><article><p>{paragraph}</p>\n\n<p>{paragraph}</p></article></body></html>"
        );
        let text = extract_content(&html).unwrap();
        assert!(text.contains("concurrent pipelines"));
        assert!(!text.contains("<p>"));
        assert!(!text.lines().any(|l| l.trim().is_empty()));
    }
}
