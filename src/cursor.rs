//! Fetch cursor bookkeeping: where each source's next fetch starts and how
//! a run's watermark gets staged for commit.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::{ContextStore, RunCommit};

#[derive(Debug, Clone, Copy, Default)]
pub struct CursorTracker {
    fetch_horizon: Option<Duration>,
}

impl CursorTracker {
    pub fn new(fetch_horizon: Option<Duration>) -> Self {
        Self { fetch_horizon }
    }

    /// Latest of the stored cursor, the horizon cutoff and the caller's
    /// window start. `None` means fetch all available history.
    pub fn combine(
        &self,
        stored: Option<DateTime<Utc>>,
        window_start: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let horizon = self
            .fetch_horizon
            .and_then(|h| chrono::Duration::from_std(h).ok())
            .map(|h| now - h);
        [stored, horizon, window_start].into_iter().flatten().max()
    }

    /// Effective `since` for every named source in one store read.
    pub async fn effective_since_all(
        &self,
        store: &ContextStore,
        item: &str,
        sources: &[String],
        window_start: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Option<DateTime<Utc>>>> {
        let stored = store.cursors(item).await?;
        Ok(sources
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    self.combine(stored.get(s).copied(), window_start, now),
                )
            })
            .collect())
    }

    /// Stage an advance of `source`'s cursor in the run's commit.
    pub fn stage(&self, commit: &mut RunCommit, source: &str, timestamp: DateTime<Utc>) {
        commit
            .cursors
            .entry(source.to_string())
            .and_modify(|t| *t = (*t).max(timestamp))
            .or_insert(timestamp);
    }
}
