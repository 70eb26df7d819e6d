//! Source adapters and the startup-time registration table.
//!
//! An adapter wraps one external service (ticket tracker, message system,
//! review system) behind two capabilities: fetch the record a tracked id
//! names, and search by free text within a time window. Everything above
//! this module talks to sources only through [`SourceRegistry`].

pub mod github;
pub mod http;
pub mod jira;
pub mod slack;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::config::{Config, SourceSettings};
use crate::credentials::CredentialStore;
use crate::error::{Error, SourceError};
use crate::ratelimit::TokenBucket;
use crate::types::ContextItem;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch the item a tracked id names in this source.
    async fn fetch_primary(&self, id: &str) -> Result<ContextItem, SourceError>;

    /// Items whose text matches `query`, updated within `(since, until]`.
    /// Adapters may over-return; callers re-apply the window.
    async fn search(
        &self,
        query: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContextItem>, SourceError>;
}

/// One row of the registration table.
pub struct RegisteredSource {
    pub name: String,
    pub adapter: Arc<dyn SourceAdapter>,
    pub settings: SourceSettings,
    pub limiter: Arc<TokenBucket>,
    id_pattern: Option<Regex>,
}

impl RegisteredSource {
    /// Whether `token` looks like an id this source owns.
    pub fn owns_id(&self, token: &str) -> bool {
        self.id_pattern
            .as_ref()
            .map(|p| p.is_match(token))
            .unwrap_or(false)
    }
}

/// Ordered name → adapter table. Order is registration order and drives
/// the order in which sources are queried.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        adapter: Arc<dyn SourceAdapter>,
        settings: SourceSettings,
    ) -> Result<(), Error> {
        if self.get(name).is_some() {
            return Err(Error::Config(format!("source '{name}' registered twice")));
        }
        let id_pattern = settings
            .id_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::Config(format!("sources.{name}.id_pattern: {e}")))?;
        let limiter = Arc::new(TokenBucket::per_minute(name, settings.rate_limit));
        self.sources.push(RegisteredSource {
            name: name.to_string(),
            adapter,
            settings,
            limiter,
            id_pattern,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Look up a source, failing with `UnknownSource` when absent.
    pub fn require(&self, name: &str) -> Result<&RegisteredSource, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Register every built-in adapter whose credentials are present.
    pub fn from_config(config: &Config, credentials: &dyn CredentialStore) -> Result<Self, Error> {
        let mut registry = Self::new();
        for (name, settings) in config.sources.iter() {
            let adapter: Option<Arc<dyn SourceAdapter>> = match name {
                "jira" => jira::JiraAdapter::from_credentials(settings, credentials)
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
                "slack" => slack::SlackAdapter::from_credentials(settings, credentials)
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
                "github" => github::GithubAdapter::from_credentials(settings, credentials)
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
                _ => None,
            };
            match adapter {
                Some(adapter) => {
                    registry.register(name, adapter, settings.clone())?;
                    info!(source = name, rate_limit = settings.rate_limit, "source registered");
                }
                None => warn!(source = name, "no credentials, source disabled"),
            }
        }
        Ok(registry)
    }
}
