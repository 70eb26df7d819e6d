//! One refresh run for one tracked item: explore, merge, render, commit.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::assemble::writer::{DocumentWriter, WriteOutcome};
use crate::assemble::{markdown, DocumentModel};
use crate::config::Config;
use crate::cursor::CursorTracker;
use crate::error::{Error, Result};
use crate::explore::{Explorer, ExploreRequest, Keywords, SourceReport};
use crate::llm::KeywordExtractor;
use crate::merge::oracle::SimilarityOracle;
use crate::merge::MergeEngine;
use crate::retry::RetryPolicy;
use crate::sources::SourceRegistry;
use crate::store::{ContextStore, RunCommit};
use crate::types::{normalize_id, ReferenceEdge, TrackedItem};

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Succeeded,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub item: String,
    pub outcome: RunOutcome,
    pub sources: BTreeMap<String, SourceReport>,
    /// Set when some new item was placed without a similarity verdict.
    /// Reported only; it does not change the outcome.
    pub oracle_degraded: bool,
    pub discovered: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub exact_skipped: usize,
    /// How each newly retained item was reached.
    pub edges: Vec<ReferenceEdge>,
    pub document: Option<PathBuf>,
    pub document_written: bool,
    pub error: Option<String>,
}

impl RunReport {
    fn new(item: &str) -> Self {
        Self {
            item: item.to_string(),
            outcome: RunOutcome::Failed,
            sources: BTreeMap::new(),
            oracle_degraded: false,
            discovered: 0,
            accepted: 0,
            duplicates: 0,
            exact_skipped: 0,
            edges: Vec::new(),
            document: None,
            document_written: false,
            error: None,
        }
    }

    /// A report for a run that never got going.
    pub fn failed(item: &str, error: impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(item)
        }
    }

    /// Attempts made per source.
    pub fn attempts(&self) -> BTreeMap<String, u32> {
        self.sources
            .iter()
            .map(|(name, r)| (name.clone(), r.attempts))
            .collect()
    }
}

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub id: String,
    /// Primary source for a first build; ignored once the item is tracked.
    pub primary_source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RunRequest {
    pub fn new(id: &str) -> Self {
        Self {
            id: normalize_id(id),
            ..Self::default()
        }
    }
}

pub struct Pipeline {
    registry: Arc<SourceRegistry>,
    store: Arc<ContextStore>,
    merge: MergeEngine,
    keywords: Option<Arc<dyn KeywordExtractor>>,
    cursors: CursorTracker,
    retry: RetryPolicy,
    writer: DocumentWriter,
    default_source: String,
    max_hops: u32,
    max_keywords: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        registry: Arc<SourceRegistry>,
        store: Arc<ContextStore>,
        oracle: Option<Arc<dyn SimilarityOracle>>,
        keywords: Option<Arc<dyn KeywordExtractor>>,
    ) -> Self {
        Self {
            registry,
            store,
            merge: MergeEngine::new(oracle),
            keywords,
            cursors: CursorTracker::new(config.scheduler.fetch_horizon),
            retry: RetryPolicy::from_config(&config.scheduler),
            writer: DocumentWriter::new(config.output.dir.clone()),
            default_source: config.sources.default_ticket_source.clone(),
            max_hops: config.ai.max_hops,
            max_keywords: config.ai.max_keywords,
        }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn writer(&self) -> &DocumentWriter {
        &self.writer
    }

    /// Run to completion. Failures are reported, never raised.
    pub async fn run(&self, request: &RunRequest, cancel: watch::Receiver<bool>) -> RunReport {
        let mut report = RunReport::new(&request.id);
        match self.try_run(request, &cancel, &mut report).await {
            Ok(()) => {
                info!(
                    item = %report.item,
                    outcome = ?report.outcome,
                    accepted = report.accepted,
                    written = report.document_written,
                    "run finished"
                );
            }
            Err(e) => {
                report.outcome = RunOutcome::Failed;
                report.error = Some(e.to_string());
                error!(item = %report.item, error = %e, "run failed");
            }
        }
        report
    }

    async fn try_run(
        &self,
        request: &RunRequest,
        cancel: &watch::Receiver<bool>,
        report: &mut RunReport,
    ) -> Result<()> {
        let now = Utc::now();
        let id = normalize_id(&request.id);
        let tracked = self.store.tracked(&id).await?;
        let primary_source = match &tracked {
            Some(t) => t.primary_source.clone(),
            None => request
                .primary_source
                .clone()
                .unwrap_or_else(|| self.default_source.clone()),
        };
        self.registry.require(&primary_source)?;

        let existing = self.store.retained(&id).await?;
        let seen = self.store.seen(&id).await?;
        let since = self
            .cursors
            .effective_since_all(&self.store, &id, &self.registry.names(), request.since, now)
            .await?;
        let keywords = match &tracked {
            Some(t) => Keywords::Known(t.keywords.clone()),
            None => Keywords::Extract {
                extractor: self.keywords.clone(),
                max: self.max_keywords,
            },
        };

        let exploration = Explorer::new(&self.registry, self.retry)
            .explore(
                ExploreRequest {
                    seed_id: id.clone(),
                    primary_source: primary_source.clone(),
                    since,
                    until: request.until,
                    max_hops: self.max_hops,
                    keywords,
                },
                cancel,
            )
            .await?;
        report.sources = exploration.sources.clone();
        report.discovered = exploration.items.len();

        let mut tracked = match tracked {
            Some(t) => t,
            None => TrackedItem::new(&id, &primary_source, exploration.keywords.clone(), now),
        };
        tracked.last_updated = now;

        let merged = self
            .merge
            .merge(&tracked, &existing, &seen, &exploration.items)
            .await;
        report.accepted = merged.accepted.len();
        report.duplicates = merged.duplicates.len();
        report.exact_skipped = merged.exact_skipped;
        report.oracle_degraded = merged.oracle_degraded;
        report.edges = merged.accepted.iter().filter_map(|r| r.edge()).collect();

        let mut commit = RunCommit::new(tracked.clone());
        for (source, r) in &exploration.sources {
            match (r.degraded, r.newest) {
                (false, Some(newest)) => self.cursors.stage(&mut commit, source, newest),
                (true, _) => warn!(item = %id, source = %source, "cursor held back, source degraded"),
                _ => {}
            }
        }
        commit.items = merged.accepted.clone();
        commit.seen = merged.duplicates.clone();

        let mut cursors_after = self.store.cursors(&id).await?;
        for (source, staged) in &commit.cursors {
            let entry = cursors_after.entry(source.clone()).or_insert(*staged);
            *entry = (*entry).max(*staged);
        }
        let mut retained = existing;
        retained.extend(merged.accepted);
        let model = DocumentModel::build(&tracked, &retained, &cursors_after);
        let rendered = markdown::render(&model);

        if *cancel.borrow() {
            return Err(Error::Cancelled);
        }

        let outcome = self
            .writer
            .write(&tracked.filename, &rendered, self.store.commit(&commit))
            .await?;
        report.document = Some(self.writer.path_for(&tracked.filename));
        report.document_written = outcome == WriteOutcome::Written;

        report.outcome = if !exploration.degraded_sources().is_empty() {
            RunOutcome::PartialSuccess
        } else {
            RunOutcome::Succeeded
        };
        Ok(())
    }
}
