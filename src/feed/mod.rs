mod fetcher;
mod subscriptions;

pub use fetcher::{parse_entries, FeedEntry, FeedFetcher};
pub use subscriptions::{parse_opml, parse_opml_file};
