//! Jira adapter (ticket tracker).
//!
//! Tickets come from the REST v3 API. Searches return each matching issue
//! plus its comments as separate items; descriptions in Atlassian Document
//! Format are flattened to plain text.

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

const SOURCE: &str = "jira";
const FIELDS: &[&str] = &["summary", "description", "comment", "created", "updated", "creator"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    #[serde(default)]
    fields: serde_json::Value,
}

enum Auth {
    Basic { email: String, token: String },
    Bearer(String),
}

pub struct JiraAdapter {
    client: Client,
    site_url: String,
    auth: Auth,
    page_size: u32,
}

impl JiraAdapter {
    pub fn new(site_url: &str, auth_email: Option<String>, token: String, page_size: u32) -> Result<Self, SourceError> {
        let auth = match auth_email {
            Some(email) => Auth::Basic { email, token },
            None => Auth::Bearer(token),
        };
        Ok(Self {
            client: http::client()?,
            site_url: site_url.trim_end_matches('/').to_string(),
            auth,
            page_size,
        })
    }

    /// Needs `token` and a site URL (`base_url` credential or setting).
    /// `email` switches to basic auth with an API token.
    pub fn from_credentials(settings: &SourceSettings, credentials: &dyn CredentialStore) -> Option<Self> {
        let token = credentials.get(SOURCE, "token")?;
        let site_url = credentials
            .get(SOURCE, "base_url")
            .or_else(|| settings.base_url.clone())?;
        let email = credentials.get(SOURCE, "email");
        match Self::new(&site_url, email, token, settings.page_size) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!(error = %e, "jira adapter unavailable");
                None
            }
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/3{}", self.site_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Basic { email, token } => req.basic_auth(email, Some(token)),
            Auth::Bearer(token) => req.bearer_auth(token),
        }
    }

    fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.site_url, key)
    }

    /// The issue as a ticket item, followed by one item per comment.
    fn parse_issue(&self, issue: &Issue) -> Result<Vec<ContextItem>, SourceError> {
        let fields = &issue.fields;
        let summary = fields["summary"].as_str().unwrap_or_default();
        let timestamp = fields["updated"]
            .as_str()
            .or_else(|| fields["created"].as_str())
            .and_then(parse_time)
            .ok_or_else(|| SourceError::Malformed(format!("{} has no timestamp", issue.key)))?;

        let mut items = vec![ContextItem {
            source: SOURCE.to_string(),
            kind: ItemKind::Ticket,
            native_id: issue.key.clone(),
            title: format!("{}: {}", issue.key, summary),
            body: adf_to_text(&fields["description"]),
            url: self.browse_url(&issue.key),
            author: display_name(&fields["creator"]),
            timestamp,
            metadata: serde_json::json!({ "ticket_id": issue.key }),
        }];

        let comments = fields["comment"]["comments"].as_array().cloned().unwrap_or_default();
        for comment in comments {
            let Some(comment_id) = comment["id"].as_str() else {
                continue;
            };
            let Some(ts) = comment["updated"]
                .as_str()
                .or_else(|| comment["created"].as_str())
                .and_then(parse_time)
            else {
                continue;
            };
            items.push(ContextItem {
                source: SOURCE.to_string(),
                kind: ItemKind::Comment,
                native_id: format!("{}/{}", issue.key, comment_id),
                title: format!("Comment on {}", issue.key),
                body: adf_to_text(&comment["body"]),
                url: format!("{}?focusedCommentId={}", self.browse_url(&issue.key), comment_id),
                author: display_name(&comment["author"]),
                timestamp: ts,
                metadata: serde_json::json!({ "ticket_id": issue.key, "comment_id": comment_id }),
            });
        }
        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for JiraAdapter {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_primary(&self, id: &str) -> Result<ContextItem, SourceError> {
        let req = self
            .client
            .get(self.api(&format!("/issue/{}", id)))
            .query(&[("fields", FIELDS.join(","))]);
        let resp = self.authorize(req).send().await.map_err(http::transport)?;
        let issue: Issue = http::json(resp, id).await?;
        self.parse_issue(&issue)?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    #[instrument(level = "debug", skip(self))]
    async fn search(
        &self,
        query: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContextItem>, SourceError> {
        let jql = build_jql(query, since, until);
        debug!(%jql, "jira search");
        let body = serde_json::json!({
            "jql": jql,
            "maxResults": self.page_size,
            "fields": FIELDS,
        });
        let req = self.client.post(self.api("/search/jql")).json(&body);
        let resp = self.authorize(req).send().await.map_err(http::transport)?;
        let data: SearchResponse = http::json(resp, "search/jql").await?;

        let mut items = Vec::new();
        for issue in &data.issues {
            match self.parse_issue(issue) {
                Ok(parsed) => items.extend(parsed),
                Err(e) => warn!(key = %issue.key, error = %e, "skipping unparsable issue"),
            }
        }
        Ok(items)
    }
}

fn looks_like_key(query: &str) -> bool {
    let mut parts = query.splitn(2, '-');
    let (Some(project), Some(number)) = (parts.next(), parts.next()) else {
        return false;
    };
    !project.is_empty()
        && project.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && project.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

fn build_jql(query: &str, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> String {
    let escaped = query.replace('\\', "\\\\").replace('"', "\\\"");
    let mut parts = vec![if looks_like_key(query) {
        format!("key = \"{}\"", escaped)
    } else {
        format!("text ~ \"{}\"", escaped)
    }];
    if let Some(since) = since {
        parts.push(format!("updated >= \"{}\"", since.format("%Y/%m/%d %H:%M")));
    }
    if let Some(until) = until {
        parts.push(format!("updated <= \"{}\"", until.format("%Y/%m/%d %H:%M")));
    }
    parts.join(" AND ")
}

/// Jira timestamps look like `2024-01-15T10:30:00.000+0000`.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn display_name(user: &serde_json::Value) -> String {
    user["displayName"]
        .as_str()
        .or_else(|| user["emailAddress"].as_str())
        .unwrap_or("Unknown")
        .to_string()
}

/// Flatten Atlassian Document Format (or a plain string) to text.
fn adf_to_text(node: &serde_json::Value) -> String {
    fn walk(node: &serde_json::Value, out: &mut String) {
        match node["type"].as_str() {
            Some("text") => out.push_str(node["text"].as_str().unwrap_or_default()),
            Some("hardBreak") => out.push('\n'),
            Some(kind) => {
                if kind == "listItem" {
                    out.push_str("- ");
                }
                if let Some(children) = node["content"].as_array() {
                    for child in children {
                        walk(child, out);
                    }
                }
                if matches!(
                    kind,
                    "paragraph" | "heading" | "listItem" | "codeBlock" | "blockquote"
                ) && !out.ends_with('\n')
                {
                    out.push('\n');
                }
            }
            None => {}
        }
    }

    match node {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(_) => {
            let mut out = String::new();
            walk(node, &mut out);
            out.trim_end().to_string()
        }
        _ => String::new(),
    }
}
