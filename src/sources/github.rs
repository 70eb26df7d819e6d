//! GitHub adapter (review system).
//!
//! Pull requests and issues of one configured repository. A `#N` query is
//! resolved directly through the issues endpoint (which also serves pull
//! requests); anything else goes through the issue search API.

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

const SOURCE: &str = "github";
const DEFAULT_API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<GithubIssue>,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

impl GithubIssue {
    fn into_item(self) -> ContextItem {
        let kind = if self.pull_request.is_some() {
            ItemKind::Review
        } else {
            ItemKind::Ticket
        };
        ContextItem {
            source: SOURCE.to_string(),
            kind,
            native_id: self.number.to_string(),
            title: self.title,
            body: self.body.unwrap_or_default(),
            url: self.html_url,
            author: self
                .user
                .map(|u| u.login)
                .unwrap_or_else(|| "Unknown".to_string()),
            timestamp: self.updated_at,
            metadata: serde_json::json!({ "number": self.number, "state": self.state }),
        }
    }
}

pub struct GithubAdapter {
    client: Client,
    api_base: String,
    token: String,
    owner: String,
    repo: String,
    page_size: u32,
}

impl GithubAdapter {
    pub fn new(
        api_base: &str,
        token: String,
        owner: &str,
        repo: &str,
        page_size: u32,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::client()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
            page_size,
        })
    }

    pub fn from_credentials(settings: &SourceSettings, credentials: &dyn CredentialStore) -> Option<Self> {
        let token = credentials.get(SOURCE, "token")?;
        let api_base = settings.base_url.clone().unwrap_or_else(|| DEFAULT_API.to_string());
        let owner = credentials
            .get(SOURCE, "owner")
            .unwrap_or_else(|| settings.default_owner.clone());
        let repo = credentials
            .get(SOURCE, "repo")
            .unwrap_or_else(|| settings.default_repo.clone());
        match Self::new(&api_base, token, &owner, &repo, settings.page_size) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!(error = %e, "github adapter unavailable");
                None
            }
        }
    }

    fn has_repo(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty()
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    async fn fetch_number(&self, number: u64) -> Result<ContextItem, SourceError> {
        if !self.has_repo() {
            return Err(SourceError::NotFound(format!(
                "#{number}: no default repository configured"
            )));
        }
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            self.api_base, self.owner, self.repo, number
        );
        let resp = self.get(url).send().await.map_err(http::transport)?;
        let issue: GithubIssue = http::json(resp, &format!("#{number}")).await?;
        Ok(issue.into_item())
    }

    fn search_query(&self, query: &str, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> String {
        let mut q = format!("\"{}\" in:title,body", query.replace('"', ""));
        if let Some(since) = since {
            q.push_str(&format!(" updated:>={}", since.format("%Y-%m-%dT%H:%M:%SZ")));
        }
        if let Some(until) = until {
            q.push_str(&format!(" updated:<={}", until.format("%Y-%m-%dT%H:%M:%SZ")));
        }
        if self.has_repo() {
            q.push_str(&format!(" repo:{}/{}", self.owner, self.repo));
        }
        q
    }
}

/// `#847`, `847` → 847.
fn review_number(id: &str) -> Option<u64> {
    id.trim().trim_start_matches('#').parse().ok()
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_primary(&self, id: &str) -> Result<ContextItem, SourceError> {
        let number = review_number(id).ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        self.fetch_number(number).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn search(
        &self,
        query: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContextItem>, SourceError> {
        if query.starts_with('#') {
            if let Some(number) = review_number(query) {
                return match self.fetch_number(number).await {
                    Ok(item) => Ok(vec![item]),
                    Err(SourceError::NotFound(_)) => Ok(Vec::new()),
                    Err(e) => Err(e),
                };
            }
        }

        let q = self.search_query(query, since, until);
        debug!(%q, "github search");
        let resp = self
            .get(format!("{}/search/issues", self.api_base))
            .query(&[
                ("q", q),
                ("per_page", self.page_size.to_string()),
                ("sort", "updated".to_string()),
            ])
            .send()
            .await
            .map_err(http::transport)?;
        let data: SearchResponse = http::json(resp, "search/issues").await?;
        Ok(data.items.into_iter().map(GithubIssue::into_item).collect())
    }
}
