//! In-crate fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use crate::assemble::DocumentModel;
use crate::config::{Config, SourceSettings};
use crate::error::{OracleError, SourceError};
use crate::merge::oracle::SimilarityOracle;
use crate::merge::verdict::Verdict;
use crate::pipeline::Pipeline;
use crate::sources::{SourceAdapter, SourceRegistry};
use crate::store::ContextStore;
use crate::types::{ContextItem, ItemKind};

/// `n` minutes after a fixed epoch.
pub fn ts(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(n)
}

pub fn item(source: &str, kind: ItemKind, id: &str, title: &str, body: &str, at: i64) -> ContextItem {
    ContextItem {
        source: source.to_string(),
        kind,
        native_id: id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        url: format!("https://{}.example/{}", source, id.trim_start_matches('#')),
        author: "tester".to_string(),
        timestamp: ts(at),
        metadata: serde_json::Value::Null,
    }
}

/// Scripted adapter over an in-memory item list.
///
/// `search` returns items whose native id equals the query or whose text
/// contains it (case-insensitive), inside the window.
pub struct FakeSource {
    name: String,
    items: Mutex<Vec<ContextItem>>,
    failure: Mutex<Option<SourceError>>,
    /// Transient failures left before calls succeed again.
    flaky: AtomicU32,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub entered: Arc<Notify>,
    pub primary_calls: AtomicU32,
    pub search_calls: AtomicU32,
    queries: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            flaky: AtomicU32::new(0),
            gate: Mutex::new(None),
            entered: Arc::new(Notify::new()),
            primary_calls: AtomicU32::new(0),
            search_calls: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_item(self, item: ContextItem) -> Self {
        self.push(item);
        self
    }

    pub fn push(&self, item: ContextItem) {
        self.items.lock().unwrap().push(item);
    }

    /// Every call fails with `err` until cleared.
    pub fn fail_with(&self, err: SourceError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// The next `n` calls fail transiently.
    pub fn flaky(&self, n: u32) {
        self.flaky.store(n, Ordering::SeqCst);
    }

    /// Block `fetch_primary` until the returned semaphore gets permits.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn check_failure(&self) -> Result<(), SourceError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        let left = self.flaky.load(Ordering::SeqCst);
        if left > 0 {
            self.flaky.store(left - 1, Ordering::SeqCst);
            return Err(SourceError::Transient(format!("{} flaked", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    async fn fetch_primary(&self, id: &str) -> Result<ContextItem, SourceError> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.map_err(|e| SourceError::Transient(e.to_string()))?;
        }
        self.check_failure()?;
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.native_id.eq_ignore_ascii_case(id))
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    async fn search(
        &self,
        query: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContextItem>, SourceError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        self.check_failure()?;
        let needle = query.to_lowercase();
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                i.native_id.eq_ignore_ascii_case(query) || i.text().to_lowercase().contains(&needle)
            })
            .filter(|i| since.map_or(true, |s| i.timestamp > s))
            .filter(|i| until.map_or(true, |u| i.timestamp <= u))
            .cloned()
            .collect())
    }
}

/// Oracle replaying scripted verdicts; `New` once the script runs out.
#[derive(Default)]
pub struct FakeOracle {
    script: Mutex<VecDeque<Result<Verdict, OracleError>>>,
    always_fail: bool,
    pub calls: AtomicU32,
}

impl FakeOracle {
    pub fn scripted(verdicts: Vec<Result<Verdict, OracleError>>) -> Self {
        Self {
            script: Mutex::new(verdicts.into()),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SimilarityOracle for FakeOracle {
    async fn classify(
        &self,
        _candidate: &ContextItem,
        _document: &DocumentModel,
    ) -> Result<Verdict, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(OracleError::Unavailable("connection refused".into()));
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Verdict::New { topic: None }))
    }
}

/// A pipeline over three fake sources seeded with the checkout scenario:
/// T-123 is mentioned in Slack and by PR #847, which depends on T-456.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub jira: Arc<FakeSource>,
    pub slack: Arc<FakeSource>,
    pub github: Arc<FakeSource>,
    pub pipeline: Pipeline,
}

pub async fn harness(oracle: Option<Arc<dyn SimilarityOracle>>) -> Harness {
    harness_with(oracle, |_| {}).await
}

/// Like `harness`, with a chance to adjust the config first.
pub async fn harness_with(
    oracle: Option<Arc<dyn SimilarityOracle>>,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.output.dir = dir.path().join("out");
    config.scheduler.retry_attempts = 2;
    config.scheduler.retry_delay = Duration::from_millis(1);
    configure(&mut config);

    let jira = Arc::new(
        FakeSource::new("jira")
            .with_item(item("jira", ItemKind::Ticket, "T-123", "Checkout payment flow", "", 0))
            .with_item(item("jira", ItemKind::Ticket, "T-456", "Gateway timeout budget", "", 5)),
    );
    let slack = Arc::new(FakeSource::new("slack").with_item(item(
        "slack",
        ItemKind::Message,
        "C1:100.1",
        "Message in #payments",
        "Has anyone looked at T-123? see PR #847",
        20,
    )));
    let github = Arc::new(FakeSource::new("github").with_item(item(
        "github",
        ItemKind::Review,
        "847",
        "Retry logic for T-123",
        "Depends on T-456",
        10,
    )));
    let mut registry = SourceRegistry::new();
    registry.register("jira", jira.clone(), SourceSettings::jira()).unwrap();
    registry.register("slack", slack.clone(), SourceSettings::slack()).unwrap();
    registry.register("github", github.clone(), SourceSettings::github()).unwrap();

    let store = Arc::new(ContextStore::open(&dir.path().join("state")).await.unwrap());
    let pipeline = Pipeline::new(&config, Arc::new(registry), store, oracle, None);
    Harness {
        dir,
        jira,
        slack,
        github,
        pipeline,
    }
}

