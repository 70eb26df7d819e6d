use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AiConfig;

const KEYWORD_PROMPT: &str = "Extract the most distinctive technical search terms from the \
work item below. Prefer component names, error names and domain nouns over generic words. \
Reply with a single comma-separated line and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Pulls topical search terms out of a primary item's text.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn keywords(&self, text: &str, max: usize) -> Result<Vec<String>>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    /// Build a client when the `[ai]` section enables one.
    pub fn from_config(ai: &AiConfig) -> Result<Option<Self>> {
        if !ai.enabled() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Some(Self {
            client,
            base_url: ai.api_base.clone(),
            model: ai.model.clone(),
            api_key: Some(ai.api_key.clone()).filter(|k| !k.is_empty()),
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `.../v1`, a bare host, or the full completions URL all work.
    fn endpoint(&self) -> String {
        match self.base_url.trim_end_matches('/') {
            b if b.ends_with("/chat/completions") => b.to_string(),
            b if b.ends_with("/v1") => format!("{b}/chat/completions"),
            b => format!("{b}/v1/chat/completions"),
        }
    }

    /// One deterministic, non-streaming completion; returns the first
    /// choice's text (empty when the model sent none).
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            max_tokens: 256,
        };
        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let reply: ChatResponse = builder
            .send()
            .await
            .with_context(|| format!("Chat request to {} failed", self.base_url))?
            .error_for_status()
            .context("Chat endpoint returned an error status")?
            .json()
            .await
            .context("Unexpected chat completion payload")?;

        Ok(reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl KeywordExtractor for LlmClient {
    async fn keywords(&self, text: &str, max: usize) -> Result<Vec<String>> {
        let messages = [Message::system(KEYWORD_PROMPT), Message::user(text)];
        let reply = self.chat(&messages).await?;
        let keywords = parse_keyword_reply(&reply, max);
        debug!(count = keywords.len(), "llm keywords");
        if keywords.is_empty() {
            anyhow::bail!("LLM returned no usable keywords");
        }
        Ok(keywords)
    }
}

/// Split a comma or newline separated reply into clean, unique terms.
fn parse_keyword_reply(reply: &str, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    reply
        .split(|c| c == ',' || c == '\n')
        .map(|k| {
            k.trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.')
                .trim()
                .trim_matches(|c| c == '"' || c == '\'' || c == '`')
                .to_lowercase()
        })
        .filter(|k| k.len() > 2 && !k.contains(' '))
        .filter(|k| seen.insert(k.clone()))
        .take(max)
        .collect()
}
