mod content_fetcher;
mod digest;
mod thumbnail;

pub use content_fetcher::{extract_content, normalize_url, ContentFetcher};
pub use digest::{build_digest, write_digest, Digest, DigestEntry};
pub use thumbnail::{first_image, og_image, sanitize_filename, youtube_thumbnail, OgThumbnailer};
