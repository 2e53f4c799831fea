use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;

/// Collect every feed url (`xmlUrl`) from an OPML file, nested outlines
/// included, in document order.
pub fn parse_opml_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}

pub fn parse_opml(content: &str) -> Result<Vec<String>> {
    let document = OPML::from_str(content)?;
    let mut urls = Vec::new();
    collect_urls(&document.body.outlines, &mut urls);
    Ok(urls)
}

fn collect_urls(outlines: &[Outline], urls: &mut Vec<String>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.as_ref().filter(|u| !u.is_empty()) {
            urls.push(url.clone());
        }
        collect_urls(&outline.outlines, urls);
    }
}
