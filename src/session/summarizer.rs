//! Shortening long replies before they are spoken

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::SessionSettings;
use super::sanitize::sanitize_for_speech;
use crate::{Error, Result};

/// Tone requested from the summarizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Conversational,
    Concise,
    Detailed,
}

/// Remote summarization service
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text` in at most `max_words` words
    ///
    /// # Errors
    ///
    /// Returns error if the service fails; callers fall back to local truncation
    async fn summarize(&self, text: &str, max_words: usize, style: SummaryStyle) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRequest<'a> {
    text: &'a str,
    max_words: usize,
    style: SummaryStyle,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// Summarizer reached over HTTP
pub struct HttpSummarizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSummarizer {
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)
            .map_err(|e| Error::Config(format!("invalid summarize url {url}: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str, max_words: usize, style: SummaryStyle) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&SummaryRequest {
                text,
                max_words,
                style,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Summarizer(format!("summarizer returned {status}")));
        }

        let body: SummaryResponse = response.json().await?;
        if body.summary.trim().is_empty() {
            return Err(Error::Summarizer("empty summary".to_string()));
        }
        Ok(body.summary)
    }
}

/// Cut `text` to at most `max_words`, preferring a sentence boundary
#[must_use]
pub fn truncate_to_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }

    let clipped = words[..max_words].join(" ");
    match clipped.rfind(['.', '!', '?']) {
        Some(end) if end > 0 => clipped[..=end].to_string(),
        _ => format!("{}...", clipped.trim_end_matches([',', ';', ':'])),
    }
}

/// Make a reply ready to speak
///
/// The reply is sanitized. When it is longer than `long_reply_chars` and
/// summarization is on, the remote summary is used; if that fails the reply
/// is truncated locally to `summary_max_words`.
///
/// # Errors
///
/// Returns `Error::Cancelled` if `cancel` fires while summarizing
pub async fn prepare_reply(
    reply: &str,
    settings: &SessionSettings,
    summarizer: Option<&dyn Summarizer>,
    cancel: &CancellationToken,
) -> Result<String> {
    let clean = sanitize_for_speech(reply);
    if clean.chars().count() <= settings.long_reply_chars || !settings.auto_summarize {
        return Ok(clean);
    }

    let remote = match summarizer {
        Some(summarizer) => {
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = summarizer.summarize(&clean, settings.summary_max_words, settings.summary_style) => result,
            }
        }
        None => Err(Error::Summarizer("no summarizer configured".to_string())),
    };

    let summary = match remote {
        Ok(summary) => sanitize_for_speech(&summary),
        Err(e) => {
            tracing::warn!(error = %e, "summary unavailable, truncating locally");
            truncate_to_words(&clean, settings.summary_max_words)
        }
    };

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(summary)
}
