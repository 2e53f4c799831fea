use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{clamp_score, Rating, SummaryPayload};
use crate::pipeline::{Rater, Summarizer};

/// Longest slice of item content sent in a single prompt.
const MAX_PROMPT_CHARS: usize = 10_000;

static RATING_RE: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    rating_model: String,
    summary_model: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            rating_model: "gpt-4o-mini".to_string(),
            summary_model: "gpt-4o".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Config("api_key is not set (config or API_KEY)".into()))?;
        Ok(Self::new(config.api_url.clone(), api_key)?
            .with_models(config.rating_model.clone(), config.summary_model.clone())
            .with_retries(config.max_retries, Duration::from_secs(config.retry_delay_secs)))
    }

    pub fn with_models(mut self, rating_model: String, summary_model: String) -> Self {
        self.rating_model = rating_model;
        self.summary_model = summary_model;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// One chat completion, retried on transport errors, 429 and 5xx with a
    /// fixed delay between attempts.
    pub async fn complete(&self, model: &str, system: &str, user: String) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: system.to_string(),
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send(&request).await {
                Ok(text) => return Ok(text),
                Err(RequestFailure::Fatal(e)) => return Err(e),
                Err(RequestFailure::Transient(e)) if attempt < self.max_retries => {
                    tracing::warn!(
                        attempt,
                        max = self.max_retries,
                        error = %e,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(RequestFailure::Transient(e)) => {
                    tracing::error!(attempts = attempt, error = %e, "LLM request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> std::result::Result<String, RequestFailure> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| RequestFailure::Transient(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = AppError::LlmApi(format!("HTTP {status}: {body}"));
            return Err(if is_transient(status) {
                RequestFailure::Transient(error)
            } else {
                RequestFailure::Fatal(error)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Transient(e.into()))?;

        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| RequestFailure::Fatal(AppError::LlmApi("empty completion".into())))
    }

    async fn optional_completion(&self, system: &str, user: String, what: &str) -> Option<String> {
        match self.complete(&self.summary_model, system, user).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to generate {}", what);
                None
            }
        }
    }
}

enum RequestFailure {
    Transient(AppError),
    Fatal(AppError),
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Rater for LlmClient {
    async fn rate(&self, criteria: &str, title: &str, content: &str) -> Result<Option<Rating>> {
        let system = format!(
            "You are an AI assistant that rates articles strictly based on the criteria: '{criteria}'. \
             First, determine if the article strictly matches the criteria. If it does not, respond \
             with 'Not relevant'. If it matches, rate the article based on its value in 'X out of 10' \
             format, where X is a number from 1 to 10, followed by one sentence explaining the rating."
        );
        let user = format!(
            "Rate the following article:\n\nTitle: {title}\n\n{}",
            truncate_chars(content, MAX_PROMPT_CHARS)
        );

        let raw = self.complete(&self.rating_model, &system, user).await?;
        tracing::debug!(%raw, "raw rating response");
        parse_rating(&raw)
    }
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, title: &str, content: &str) -> Result<SummaryPayload> {
        let content = truncate_chars(content, MAX_PROMPT_CHARS);

        let (chinese_title, chinese_summary, english_summary) = tokio::join!(
            self.optional_completion(
                "You are a translator. Translate the given title to Chinese (zh-CN). \
                 Output only the translated title without any additional text.",
                format!("Translate this title to Chinese:\n\n{title}"),
                "Chinese title",
            ),
            self.optional_completion(
                "You are an AI assistant that summarizes articles in Chinese (zh-CN). \
                 Provide a concise summary in about 3-5 sentences in Chinese.",
                format!(
                    "Summarize the following article in Chinese (zh-CN). Do not output anything \
                     that is irrelevant to the article.\n\nTitle: {title}\n\nContent:\n{content}"
                ),
                "Chinese summary",
            ),
            self.optional_completion(
                "You are an AI assistant that summarizes articles. \
                 Provide a concise summary in about 3-5 sentences.",
                format!("Summarize the following article:\n\nTitle: {title}\n\nContent:\n{content}"),
                "English summary",
            ),
        );

        let payload = SummaryPayload {
            chinese_title,
            english_summary,
            chinese_summary,
        };
        if payload.is_empty() {
            return Err(AppError::LlmApi(format!("all summary requests failed for '{title}'")));
        }
        Ok(payload)
    }
}

/// Interpret a rating reply. "Not relevant" yields `None`; anything
/// without an "X out of 10" score is an error.
pub fn parse_rating(raw: &str) -> Result<Option<Rating>> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if lowered.trim_end_matches('.') == "not relevant" {
        return Ok(None);
    }

    let re = RATING_RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:out of|/)\s*10").expect("valid rating regex")
    });

    let score = re
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| AppError::LlmApi(format!("unexpected rating format: {trimmed}")))?;

    Ok(Some(Rating {
        score: clamp_score(score),
        reason: trimmed.to_string(),
    }))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
