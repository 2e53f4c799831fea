mod client;

pub use client::{parse_rating, LlmClient};
