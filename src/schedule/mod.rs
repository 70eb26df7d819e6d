//! Refresh scheduler: periodic ticks, staleness eligibility, one in-flight
//! run per tracked item and a bounded worker pool shared by scheduled and
//! manual triggers.

pub mod task;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, RunRequest};
use crate::types::normalize_id;
use task::{RefreshTask, Trigger};

/// Terminal tasks kept for `status`.
const HISTORY_LIMIT: usize = 100;

/// What one scheduled tick did.
#[derive(Debug, Default, Serialize)]
pub struct TickReport {
    pub completed: Vec<RefreshTask>,
    pub skipped_stale: Vec<String>,
    pub skipped_busy: Vec<String>,
}

/// Membership in the in-flight set, released on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    config: SchedulerConfig,
    in_flight: Mutex<HashSet<String>>,
    workers: Semaphore,
    history: Mutex<VecDeque<RefreshTask>>,
    next_task: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, config: SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            workers: Semaphore::new(config.max_concurrent_runs.max(1)),
            config,
            in_flight: Mutex::new(HashSet::new()),
            history: Mutex::new(VecDeque::new()),
            next_task: AtomicU64::new(1),
            shutdown,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Ask the loop to stop and in-flight runs to abort at their next hop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Finished tasks, most recent first.
    pub fn history(&self) -> Vec<RefreshTask> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    fn claim(&self, id: &str) -> Result<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.to_string()) {
            return Err(Error::Busy(id.to_string()));
        }
        Ok(InFlight {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }

    fn record(&self, task: &RefreshTask) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(task.clone());
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    async fn execute(
        &self,
        claim: InFlight<'_>,
        trigger: Trigger,
        request: RunRequest,
    ) -> Result<RefreshTask> {
        let mut task = RefreshTask::new(
            self.next_task.fetch_add(1, Ordering::Relaxed),
            &claim.id,
            trigger,
            Utc::now(),
        );
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        task.start(Utc::now())?;
        debug!(task = task.id, item = %task.item, trigger = ?trigger, "task running");

        let report = self.pipeline.run(&request, self.shutdown.subscribe()).await;
        task.finish(report, Utc::now())?;
        info!(task = task.id, item = %task.item, state = ?task.state, "task finished");
        self.record(&task);
        drop(claim);
        Ok(task)
    }

    /// Manual run for any id, tracked or not. Fails with `Busy` when a run
    /// for the same item is already in flight.
    pub async fn trigger(&self, mut request: RunRequest) -> Result<RefreshTask> {
        request.id = normalize_id(&request.id);
        let claim = self.claim(&request.id)?;
        self.execute(claim, Trigger::Manual, request).await
    }

    /// Manual refresh of an already tracked item, ignoring staleness.
    pub async fn refresh(&self, id: &str) -> Result<RefreshTask> {
        let id = normalize_id(id);
        if self.pipeline.store().tracked(&id).await?.is_none() {
            return Err(Error::NotTracked(id));
        }
        self.trigger(RunRequest::new(&id)).await
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Refresh every tracked item updated within the staleness threshold
    /// of `now`, concurrently up to the worker limit.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let threshold = chrono::Duration::from_std(self.config.staleness_threshold)
            .map_err(|e| Error::Config(format!("staleness_threshold: {e}")))?;

        let mut runs = FuturesUnordered::new();
        for tracked in self.pipeline.store().list_tracked().await? {
            if now - tracked.last_updated > threshold {
                info!(item = %tracked.id, last_updated = %tracked.last_updated, "stale, skipped by scheduler");
                report.skipped_stale.push(tracked.id);
                continue;
            }
            match self.claim(&tracked.id) {
                Ok(claim) => {
                    runs.push(self.execute(claim, Trigger::Scheduled, RunRequest::new(&tracked.id)))
                }
                Err(_) => {
                    debug!(item = %tracked.id, "run in flight, skipped by scheduler");
                    report.skipped_busy.push(tracked.id);
                }
            }
        }

        while let Some(result) = runs.next().await {
            match result {
                Ok(task) => report.completed.push(task),
                Err(e) => warn!(error = %e, "scheduled task failed to run"),
            }
        }
        info!(
            completed = report.completed.len(),
            stale = report.skipped_stale.len(),
            busy = report.skipped_busy.len(),
            "tick complete"
        );
        Ok(report)
    }

    /// Tick every `refresh_interval` until `shutdown` is called.
    pub async fn run_forever(&self) {
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stop = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
            }
            if self.is_shutting_down() {
                info!("scheduler stopped");
                return;
            }
        }
    }
}
