//! Assistant backend that answers transcripts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::intent::Screen;
use crate::error::VoiceErrorKind;
use crate::{Error, Result};

/// Reply from the assistant
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AssistantReply {
    /// Display text, possibly markdown
    #[serde(alias = "reply", alias = "content", alias = "message")]
    pub text: String,
    /// Screen the assistant wants the user to see
    #[serde(default)]
    pub navigate_to: Option<Screen>,
}

impl AssistantReply {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            navigate_to: None,
        }
    }
}

/// Answers a user's transcript
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Submit a finalized transcript
    ///
    /// # Errors
    ///
    /// Returns error if the assistant cannot be reached or rejects the message
    async fn submit(&self, text: &str) -> Result<AssistantReply>;
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    message: &'a str,
    source: &'a str,
}

/// Assistant reached over HTTP
pub struct HttpAssistant {
    client: reqwest::Client,
    url: String,
}

impl HttpAssistant {
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)
            .map_err(|e| Error::Config(format!("invalid assistant url {url}: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn submit(&self, text: &str) -> Result<AssistantReply> {
        let response = self
            .client
            .post(&self.url)
            .json(&SubmitRequest {
                message: text,
                source: "voice",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "assistant error");
            return Err(Error::Assistant(format!("assistant returned {status}")));
        }

        let reply: AssistantReply = response.json().await.map_err(|e| {
            Error::voice(
                VoiceErrorKind::ServiceUnavailable,
                format!("malformed assistant reply: {e}"),
            )
        })?;

        tracing::debug!(chars = reply.text.len(), navigate_to = ?reply.navigate_to, "assistant replied");
        Ok(reply)
    }
}
