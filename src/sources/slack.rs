//! Slack adapter (message system).
//!
//! Uses `search.messages` with a user token. Message ids are
//! `<channel id>:<ts>`, the pair `conversations.history` needs to fetch one
//! message back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::http;
use super::SourceAdapter;
use crate::config::SourceSettings;
use crate::credentials::CredentialStore;
use crate::error::SourceError;
use crate::types::{ContextItem, ItemKind};

const SOURCE: &str = "slack";
const DEFAULT_API: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Option<Matches>,
}

#[derive(Debug, Deserialize)]
struct Matches {
    #[serde(default)]
    matches: Vec<SlackMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    channel: Option<Channel>,
}

#[derive(Debug, Clone, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

pub struct SlackAdapter {
    client: Client,
    api_base: String,
    token: String,
    page_size: u32,
}

impl SlackAdapter {
    pub fn new(api_base: &str, token: String, page_size: u32) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::client()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            page_size,
        })
    }

    pub fn from_credentials(settings: &SourceSettings, credentials: &dyn CredentialStore) -> Option<Self> {
        let token = credentials.get(SOURCE, "token")?;
        let api_base = settings.base_url.clone().unwrap_or_else(|| DEFAULT_API.to_string());
        match Self::new(&api_base, token, settings.page_size) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!(error = %e, "slack adapter unavailable");
                None
            }
        }
    }

    fn to_item(msg: &SlackMessage, channel: &Channel) -> Result<ContextItem, SourceError> {
        let timestamp = parse_ts(&msg.ts)
            .ok_or_else(|| SourceError::Malformed(format!("bad slack ts '{}'", msg.ts)))?;
        let channel_name = channel.name.clone().unwrap_or_else(|| channel.id.clone());
        Ok(ContextItem {
            source: SOURCE.to_string(),
            kind: ItemKind::Message,
            native_id: format!("{}:{}", channel.id, msg.ts),
            title: format!("Message in #{}", channel_name),
            body: msg.text.clone(),
            url: msg.permalink.clone().unwrap_or_default(),
            author: msg
                .username
                .clone()
                .or_else(|| msg.user.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            timestamp,
            metadata: serde_json::json!({
                "channel_id": channel.id,
                "channel_name": channel.name,
                "thread_ts": msg.thread_ts,
            }),
        })
    }
}

/// Slack reports API-level failures as `ok: false` with an error code.
fn api_error(code: Option<&str>) -> SourceError {
    match code.unwrap_or("unknown_error") {
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired" | "account_inactive"
        | "missing_scope" => SourceError::AuthInvalid,
        "ratelimited" => SourceError::RateLimited { retry_after: None },
        "channel_not_found" | "message_not_found" => SourceError::NotFound(code.unwrap_or_default().to_string()),
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            SourceError::Transient(code.unwrap_or_default().to_string())
        }
        other => SourceError::Malformed(other.to_string()),
    }
}

#[async_trait]
impl SourceAdapter for SlackAdapter {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_primary(&self, id: &str) -> Result<ContextItem, SourceError> {
        let Some((channel_id, ts)) = id.split_once(':') else {
            return Err(SourceError::NotFound(id.to_string()));
        };
        let resp = self
            .client
            .get(format!("{}/conversations.history", self.api_base))
            .bearer_auth(&self.token)
            .query(&[
                ("channel", channel_id),
                ("latest", ts),
                ("inclusive", "true"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(http::transport)?;
        let data: HistoryResponse = http::json(resp, id).await?;
        if !data.ok {
            return Err(api_error(data.error.as_deref()));
        }
        let msg = data
            .messages
            .into_iter()
            .find(|m| m.ts == ts)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        let channel = Channel {
            id: channel_id.to_string(),
            name: None,
        };
        Self::to_item(&msg, &channel)
    }

    #[instrument(level = "debug", skip(self))]
    async fn search(
        &self,
        query: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContextItem>, SourceError> {
        let resp = self
            .client
            .get(format!("{}/search.messages", self.api_base))
            .bearer_auth(&self.token)
            .query(&[
                ("query", query.to_string()),
                ("count", self.page_size.to_string()),
                ("sort", "timestamp".to_string()),
            ])
            .send()
            .await
            .map_err(http::transport)?;
        let data: SearchResponse = http::json(resp, "search.messages").await?;
        if !data.ok {
            return Err(api_error(data.error.as_deref()));
        }

        let matches = data.messages.map(|m| m.matches).unwrap_or_default();
        debug!(query, matches = matches.len(), "slack search");
        let mut items = Vec::new();
        for msg in &matches {
            let Some(channel) = &msg.channel else {
                continue;
            };
            match Self::to_item(msg, channel) {
                Ok(item) => {
                    if since.is_some_and(|s| item.timestamp <= s) || until.is_some_and(|u| item.timestamp > u) {
                        continue;
                    }
                    items.push(item);
                }
                Err(e) => warn!(error = %e, "skipping slack match"),
            }
        }
        Ok(items)
    }
}

/// `1700000000.000200` → UTC instant with microseconds.
fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{:0<6}", frac).get(..6)?.parse().ok()?;
    DateTime::from_timestamp(secs, micros * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts() {
        let t = parse_ts("1700000000.000200").unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
        assert_eq!(t.timestamp_subsec_micros(), 200);
        assert!(parse_ts("abc").is_none());
    }

    #[test]
    fn test_message_to_item() {
        let msg: SlackMessage = serde_json::from_value(serde_json::json!({
            "ts": "1700000000.000100",
            "text": "Has anyone looked at T-123? see PR #847",
            "permalink": "https://acme.slack.com/archives/C1/p1700000000000100",
            "username": "ada",
            "channel": { "id": "C1", "name": "payments" }
        }))
        .unwrap();
        let channel = msg.channel.clone().unwrap();
        let item = SlackAdapter::to_item(&msg, &channel).unwrap();
        assert_eq!(item.native_id, "C1:1700000000.000100");
        assert_eq!(item.title, "Message in #payments");
        assert_eq!(item.author, "ada");
        assert_eq!(item.kind, ItemKind::Message);
    }

    #[test]
    fn test_api_error_codes() {
        assert_eq!(api_error(Some("invalid_auth")), SourceError::AuthInvalid);
        assert!(matches!(api_error(Some("ratelimited")), SourceError::RateLimited { .. }));
        assert!(matches!(api_error(None), SourceError::Malformed(_)));
    }
}
