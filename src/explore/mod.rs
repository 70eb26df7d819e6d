//! Bounded breadth-first search over reference tokens.
//!
//! Hop 0 fetches the seed from its primary source. Each later hop searches
//! every eligible source for every unvisited token of the frontier, and the
//! text of each newly found item feeds the next frontier. The search stops
//! when the frontier empties or the hop limit is reached.

pub mod tokens;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, SourceError};
use crate::llm::KeywordExtractor;
use crate::retry::RetryPolicy;
use crate::sources::{RegisteredSource, SourceRegistry};
use crate::types::{ContextItem, IdentityKey, ReferenceEdge};
use tokens::{extract_keywords, extract_references, Token};

/// An item found by the explorer, the hop it was found at, and the item
/// whose reference led to it (`None` for the seed).
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    pub item: ContextItem,
    pub hop: u32,
    pub parent: Option<IdentityKey>,
}

impl Discovered {
    pub fn edge(&self) -> Option<ReferenceEdge> {
        self.parent.as_ref().map(|parent| ReferenceEdge {
            parent: parent.clone(),
            child: self.item.identity(),
            hop: self.hop,
        })
    }
}

/// Per-source accounting for one exploration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// Logical calls (primary fetch or search).
    pub calls: u32,
    /// Attempts including retries.
    pub attempts: u32,
    /// Items emitted from this source.
    pub items: usize,
    pub malformed: usize,
    pub failures: Vec<String>,
    /// Set when a call failed after retries; the source is not queried
    /// again in this run.
    pub degraded: bool,
    /// Newest timestamp among emitted items.
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Exploration {
    pub items: Vec<Discovered>,
    pub sources: BTreeMap<String, SourceReport>,
    /// Keywords used as topical search terms.
    pub keywords: Vec<String>,
}

impl Exploration {
    pub fn primary(&self) -> Option<&ContextItem> {
        self.items.iter().find(|d| d.hop == 0).map(|d| &d.item)
    }

    pub fn degraded_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|(_, r)| r.degraded)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Where hop-1 keywords come from.
pub enum Keywords {
    /// Fixed list (a refresh reuses the keywords chosen at creation).
    Known(Vec<String>),
    /// Derive from the primary item, asking the extractor first.
    Extract {
        extractor: Option<Arc<dyn KeywordExtractor>>,
        max: usize,
    },
}

pub struct ExploreRequest {
    pub seed_id: String,
    pub primary_source: String,
    /// Effective `since` per source name.
    pub since: BTreeMap<String, Option<DateTime<Utc>>>,
    pub until: Option<DateTime<Utc>>,
    pub max_hops: u32,
    pub keywords: Keywords,
}

pub struct Explorer<'a> {
    registry: &'a SourceRegistry,
    retry: RetryPolicy,
}

/// The seed id as a token: its own reference kind, else a keyword.
fn seed_token(seed: &str) -> Token {
    extract_references(seed)
        .into_iter()
        .find(|t| t.query() == seed)
        .unwrap_or_else(|| Token::Keyword(seed.to_string()))
}

fn in_window(ts: DateTime<Utc>, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> bool {
    since.map_or(true, |s| ts > s) && until.map_or(true, |u| ts <= u)
}

impl<'a> Explorer<'a> {
    pub fn new(registry: &'a SourceRegistry, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    pub async fn explore(
        &self,
        request: ExploreRequest,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Exploration> {
        let primary = self.registry.require(&request.primary_source)?;
        let mut out = Exploration::default();
        for source in self.registry.iter() {
            out.sources.insert(source.name.clone(), SourceReport::default());
        }

        // Hop 0
        let seed = self.fetch_seed(primary, &request.seed_id, cancel, &mut out).await?;
        let seed_identity = seed.identity();
        let mut visited: HashSet<IdentityKey> = HashSet::from([seed_identity.clone()]);

        out.keywords = match request.keywords {
            Keywords::Known(k) => k,
            Keywords::Extract { extractor, max } => resolve_keywords(extractor, &seed, max).await,
        };

        let mut origin: HashMap<Token, IdentityKey> = HashMap::new();
        let mut frontier: BTreeSet<Token> = BTreeSet::new();
        let mut seed_tokens = extract_references(&seed.text());
        seed_tokens.insert(seed_token(&request.seed_id));
        seed_tokens.extend(out.keywords.iter().map(|k| Token::Keyword(k.clone())));
        for token in seed_tokens {
            origin.entry(token.clone()).or_insert_with(|| seed_identity.clone());
            frontier.insert(token);
        }
        out.items.push(Discovered {
            item: seed,
            hop: 0,
            parent: None,
        });

        let mut visited_tokens: HashSet<Token> = HashSet::new();
        for hop in 1..=request.max_hops {
            if *cancel.borrow() {
                info!(seed = %request.seed_id, hop, "exploration cancelled");
                return Err(Error::Cancelled);
            }
            frontier.retain(|t| !visited_tokens.contains(t));
            if frontier.is_empty() {
                break;
            }
            debug!(seed = %request.seed_id, hop, tokens = frontier.len(), "expanding frontier");

            let mut next: BTreeSet<Token> = BTreeSet::new();
            for token in std::mem::take(&mut frontier) {
                visited_tokens.insert(token.clone());
                for source in self.registry.iter() {
                    if source.name == primary.name && !source.owns_id(token.query()) {
                        continue;
                    }
                    if out.sources.get(&source.name).is_some_and(|r| r.degraded) {
                        continue;
                    }
                    let since = request.since.get(&source.name).copied().flatten();
                    let found = self
                        .search(source, &token, since, request.until, cancel, &mut out)
                        .await;
                    for item in found {
                        let identity = item.identity();
                        if !visited.insert(identity.clone()) {
                            continue;
                        }
                        if let Some(report) = out.sources.get_mut(&source.name) {
                            report.items += 1;
                            report.newest = report.newest.max(Some(item.timestamp));
                        }
                        let parent = origin.get(&token).cloned();
                        for t in extract_references(&item.text()) {
                            if !visited_tokens.contains(&t) {
                                origin.entry(t.clone()).or_insert_with(|| identity.clone());
                                next.insert(t);
                            }
                        }
                        out.items.push(Discovered { item, hop, parent });
                    }
                }
            }
            frontier = next;
        }

        info!(
            seed = %request.seed_id,
            items = out.items.len(),
            degraded = ?out.degraded_sources(),
            "exploration complete"
        );
        Ok(out)
    }

    async fn fetch_seed(
        &self,
        primary: &RegisteredSource,
        seed_id: &str,
        cancel: &watch::Receiver<bool>,
        out: &mut Exploration,
    ) -> Result<ContextItem> {
        let adapter = primary.adapter.clone();
        let (result, attempts) = self
            .retry
            .call(&primary.name, &primary.limiter, cancel, || {
                let adapter = adapter.clone();
                let id = seed_id.to_string();
                async move { adapter.fetch_primary(&id).await }
            })
            .await;
        let report = out.sources.entry(primary.name.clone()).or_default();
        report.calls += 1;
        report.attempts += attempts;
        if result.is_err() && *cancel.borrow() {
            return Err(Error::Cancelled);
        }

        let fail = |error: SourceError| Error::PrimaryFetch {
            source_name: primary.name.clone(),
            id: seed_id.to_string(),
            error,
        };
        let item = result.map_err(fail)?;
        item.validate(&primary.name).map_err(fail)?;
        report.items += 1;
        report.newest = Some(item.timestamp);
        Ok(item)
    }

    /// One search call with retries; failures are recorded and yield nothing.
    async fn search(
        &self,
        source: &RegisteredSource,
        token: &Token,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        cancel: &watch::Receiver<bool>,
        out: &mut Exploration,
    ) -> Vec<ContextItem> {
        let adapter = source.adapter.clone();
        let query = token.query().to_string();
        let (result, attempts) = self
            .retry
            .call(&source.name, &source.limiter, cancel, || {
                let adapter = adapter.clone();
                let query = query.clone();
                async move { adapter.search(&query, since, until).await }
            })
            .await;
        let report = out.sources.entry(source.name.clone()).or_default();
        report.calls += 1;
        report.attempts += attempts;

        let items = match result {
            Ok(items) => items,
            Err(SourceError::NotFound(_)) => Vec::new(),
            Err(e) => {
                warn!(source = %source.name, %token, error = %e, "source degraded for this run");
                report.failures.push(format!("{}: {}", token, e));
                report.degraded = true;
                return Vec::new();
            }
        };

        items
            .into_iter()
            .filter(|item| match item.validate(&source.name) {
                Ok(()) => true,
                Err(e) => {
                    warn!(source = %source.name, error = %e, "skipping malformed item");
                    report.malformed += 1;
                    false
                }
            })
            .filter(|item| in_window(item.timestamp, since, until))
            .collect()
    }
}

async fn resolve_keywords(
    extractor: Option<Arc<dyn KeywordExtractor>>,
    seed: &ContextItem,
    max: usize,
) -> Vec<String> {
    if max == 0 {
        return Vec::new();
    }
    if let Some(extractor) = extractor {
        match extractor.keywords(&seed.text(), max).await {
            Ok(keywords) if !keywords.is_empty() => return keywords,
            Ok(_) => debug!("extractor returned no keywords, using fallback"),
            Err(e) => warn!(error = %e, "keyword extraction failed, using fallback"),
        }
    }
    extract_keywords(&seed.title, &seed.body, max)
}
