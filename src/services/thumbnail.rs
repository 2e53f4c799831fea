use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use url::Url;

use crate::error::Result;
use crate::models::Item;
use crate::pipeline::Thumbnailer;

use super::content_fetcher::normalize_url;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Longest file stem written under the thumbnails directory.
const MAX_STEM_CHARS: usize = 120;

/// Declared dimensions at or below this are icons, not previews.
const MIN_IMAGE_SIDE: u32 = 100;

/// Path or host words that mark an advertising image.
const AD_MARKERS: [&str; 5] = ["ad", "ads", "banner", "sponsor", "sponsored"];

/// Finds a preview image for an item (YouTube still, else the page's
/// `og:image`, else its first plausible `<img>`) and downloads it under
/// `<output_dir>/thumbnails`.
pub struct OgThumbnailer {
    client: Client,
    dir: PathBuf,
}

impl OgThumbnailer {
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            dir: output_dir.as_ref().join("thumbnails"),
        })
    }

    async fn find_image_url(&self, page_url: &str) -> Option<String> {
        if let Some(still) = youtube_thumbnail(page_url) {
            return Some(still);
        }

        let response = match self.client.get(normalize_url(page_url)).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(url = page_url, status = %r.status(), "page not available");
                return None;
            }
            Err(e) => {
                tracing::debug!(url = page_url, error = %e, "could not load page");
                return None;
            }
        };
        let html = response.text().await.ok()?;
        let image = og_image(&html).or_else(|| first_image(&html))?;

        // og:image may be relative to the page
        Url::parse(&normalize_url(page_url))
            .and_then(|base| base.join(&image))
            .map(|u| u.to_string())
            .ok()
    }

    async fn download(&self, image_url: &str, target: &Path) -> Result<bool> {
        let response = match self.client.get(image_url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(image_url, status = %r.status(), "image not reachable");
                return Ok(false);
            }
            Err(e) => {
                tracing::debug!(image_url, error = %e, "image download failed");
                return Ok(false);
            }
        };
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(target, &bytes).await?;
        Ok(true)
    }
}

#[async_trait]
impl Thumbnailer for OgThumbnailer {
    async fn thumbnail(&self, item: &Item) -> Result<Option<String>> {
        let Some(image_url) = self.find_image_url(&item.url).await else {
            return Ok(None);
        };

        let title = item.chinese_title.as_deref().unwrap_or(&item.title);
        let target = self
            .dir
            .join(format!("{}_{}.jpg", item.id, sanitize_filename(title)));

        if !self.download(&image_url, &target).await? {
            return Ok(None);
        }
        tracing::debug!(id = item.id, path = %target.display(), "thumbnail saved");
        Ok(Some(target.to_string_lossy().to_string()))
    }
}

/// Still image for a YouTube watch or short link.
pub fn youtube_thumbnail(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let video_id = match parsed.host_str()? {
        "youtu.be" => parsed.path().trim_start_matches('/').to_string(),
        "www.youtube.com" | "youtube.com" | "m.youtube.com" => parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())?,
        _ => return None,
    };
    if video_id.is_empty() {
        return None;
    }
    Some(format!("https://img.youtube.com/vi/{video_id}/0.jpg"))
}

/// `content` of the first `<meta property="og:image">` tag.
pub fn og_image(html: &str) -> Option<String> {
    static META: OnceLock<Regex> = OnceLock::new();
    static CONTENT: OnceLock<Regex> = OnceLock::new();
    let meta = META.get_or_init(|| {
        Regex::new(r#"(?is)<meta\b[^>]*property\s*=\s*["']og:image["'][^>]*>"#)
            .expect("og:image pattern is valid")
    });
    let content = CONTENT.get_or_init(|| {
        Regex::new(r#"(?is)content\s*=\s*["']([^"']+)["']"#).expect("content pattern is valid")
    });

    let tag = meta.find(html)?.as_str();
    let value = content.captures(tag)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `src` of the first `<img>` that does not look like an ad, an icon or a
/// vector graphic.
pub fn first_image(html: &str) -> Option<String> {
    static IMG: OnceLock<Regex> = OnceLock::new();
    static ATTR: OnceLock<Regex> = OnceLock::new();
    let img =
        IMG.get_or_init(|| Regex::new(r"(?is)<img\b[^>]*>").expect("img pattern is valid"));
    let attr = ATTR.get_or_init(|| {
        Regex::new(r#"(?is)\b(src|width|height)\s*=\s*["']?([^"'\s>]+)"#)
            .expect("attribute pattern is valid")
    });

    img.find_iter(html).find_map(|tag| {
        let mut src = None;
        let mut too_small = false;
        for caps in attr.captures_iter(tag.as_str()) {
            let value = &caps[2];
            match caps[1].to_ascii_lowercase().as_str() {
                "src" => src = Some(value.to_string()),
                _ => {
                    if value.parse::<u32>().is_ok_and(|side| side <= MIN_IMAGE_SIDE) {
                        too_small = true;
                    }
                }
            }
        }

        let src = src?;
        let lowered = src.to_lowercase();
        let is_ad = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| AD_MARKERS.contains(&word));
        (!is_ad && !too_small && !lowered.ends_with(".svg")).then_some(src)
    })
}

/// File-system safe stem: whitespace to `_`, anything else that is not a
/// word character, `-` or `.` dropped.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push('_');
            }
            last_was_space = true;
            continue;
        }
        last_was_space = false;
        if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
            out.push(c);
        }
    }
    out.chars().take(MAX_STEM_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_links_map_to_stills() {
        assert_eq!(
            youtube_thumbnail("https://www.youtube.com/watch?v=abc123&t=5").as_deref(),
            Some("https://img.youtube.com/vi/abc123/0.jpg")
        );
        assert_eq!(
            youtube_thumbnail("https://youtu.be/xyz").as_deref(),
            Some("https://img.youtube.com/vi/xyz/0.jpg")
        );
        assert_eq!(youtube_thumbnail("https://www.youtube.com/feed"), None);
        assert_eq!(youtube_thumbnail("https://example.com/watch?v=abc"), None);
    }

    #[test]
    fn og_image_is_found_regardless_of_attribute_order() {
        let html =
            r#"<head><meta content="https://cdn.example.com/a.jpg" property="og:image" /></head>"#;
        assert_eq!(og_image(html).as_deref(), Some("https://cdn.example.com/a.jpg"));

        let html = r#"<meta property='og:image' content='/img/b.png'>"#;
        assert_eq!(og_image(html).as_deref(), Some("/img/b.png"));

        assert_eq!(og_image("<meta property=\"og:title\" content=\"x\">"), None);
    }

    #[test]
    fn first_image_skips_ads_icons_and_vectors() {
        let html = r#"
            <img src="/static/logo.svg">
            <img src="https://ads.example.com/banner.jpg" width="728" height="300">
            <img src="/icons/share.png" width="16" height="16">
            <img alt="lead" src="/media/lead-photo.jpg" width="1200" height="630">
            <img src="/media/second.jpg">"#;
        assert_eq!(first_image(html).as_deref(), Some("/media/lead-photo.jpg"));

        assert_eq!(first_image("<p>no pictures</p>"), None);
        assert_eq!(first_image("<IMG SRC='/pic.jpeg'>").as_deref(), Some("/pic.jpeg"));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("What's new: Rust 2.0?"), "Whats_new_Rust_2.0");
        assert_eq!(sanitize_filename("a/b\\c  d"), "abc_d");
        assert_eq!(sanitize_filename("中文 标题"), "中文_标题");
        assert_eq!(sanitize_filename(&"x".repeat(500)).len(), MAX_STEM_CHARS);
    }
}
