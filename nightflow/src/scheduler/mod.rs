//! Cron-driven pipeline scheduler.
//!
//! The scheduler keeps one next-fire instant per pipeline. On each tick every
//! due pipeline is dispatched to the run controller unless a run of the same
//! pipeline is still in flight, in which case the firing is recorded as
//! skipped. Either way next-fire advances past `now`; missed occurrences are
//! never backfilled.

mod checkpoint;
mod schedule;

pub use checkpoint::SchedulerCheckpoint;
pub use schedule::CronSchedule;

use crate::cancellation::CancellationToken;
use crate::core::RunId;
use crate::errors::NightflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{PipelineDefinition, PipelineRun, PipelineRunController};
use crate::utils::{format_iso8601, now_utc, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const FIRE_HISTORY_CAPACITY: usize = 256;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Wall-clock cadence of [`Scheduler::run`] ticks.
    pub tick_interval: Duration,
    /// Number of terminal runs kept for inspection.
    pub archive_capacity: usize,
    /// Where next-fire instants are persisted after each firing.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            archive_capacity: 64,
            checkpoint_path: None,
        }
    }
}

/// What happened when a pipeline came due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FireAction {
    /// A new run was handed to the controller.
    Dispatched {
        /// The new run.
        run_id: RunId,
    },
    /// The firing was dropped because a run was still in flight.
    SkippedOverlap {
        /// The run that was still in flight.
        active_run: RunId,
    },
}

/// One firing of a pipeline, scheduled or manual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FireRecord {
    /// The pipeline name.
    pub pipeline: String,
    /// The occurrence that came due (the trigger time for manual fires).
    pub scheduled_for: Timestamp,
    /// When the scheduler acted on it.
    pub fired_at: Timestamp,
    /// Whether a run was dispatched.
    #[serde(flatten)]
    pub action: FireAction,
}

impl FireRecord {
    /// Returns true if the firing dispatched a run.
    #[must_use]
    pub fn dispatched(&self) -> bool {
        matches!(self.action, FireAction::Dispatched { .. })
    }
}

#[derive(Debug)]
struct ScheduleEntry {
    definition: Arc<PipelineDefinition>,
    next_fire: Option<Timestamp>,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: RunId,
    cancel: Arc<CancellationToken>,
}

type ActiveRuns = Arc<Mutex<HashMap<String, ActiveRun>>>;

/// Releases the single-instance slot of a pipeline when its run task ends,
/// including by panic.
struct ActiveRunGuard {
    active: ActiveRuns,
    pipeline: String,
    run_id: RunId,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if active.get(&self.pipeline).is_some_and(|a| a.run_id == self.run_id) {
            active.remove(&self.pipeline);
        }
    }
}

/// Triggers registered pipelines and enforces one in-flight run per pipeline.
pub struct Scheduler {
    controller: Arc<PipelineRunController>,
    config: SchedulerConfig,
    event_sink: Arc<dyn EventSink>,
    entries: Vec<ScheduleEntry>,
    active: ActiveRuns,
    archive: Arc<Mutex<VecDeque<PipelineRun>>>,
    history: VecDeque<FireRecord>,
    runs: JoinSet<()>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("pipelines", &self.pipelines())
            .field("active", &self.active.lock().len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler dispatching to `controller`.
    #[must_use]
    pub fn new(controller: PipelineRunController) -> Self {
        Self {
            controller: Arc::new(controller),
            config: SchedulerConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
            entries: Vec::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            archive: Arc::new(Mutex::new(VecDeque::new())),
            history: VecDeque::new(),
            runs: JoinSet::new(),
        }
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the sink receiving `schedule.*` events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Registers a pipeline; its first fire is the first occurrence after `now`.
    ///
    /// Pipelines without a schedule can only be started with
    /// [`Scheduler::trigger_now`].
    ///
    /// # Errors
    ///
    /// Returns [`NightflowError::DuplicatePipeline`] if the name is taken.
    pub fn register(&mut self, definition: PipelineDefinition, now: Timestamp) -> Result<(), NightflowError> {
        if self.entry(definition.name()).is_some() {
            return Err(NightflowError::DuplicatePipeline(definition.name().to_string()));
        }
        let next_fire = definition.schedule().and_then(|s| s.next_after(now));
        info!(
            pipeline = %definition.name(),
            schedule = ?definition.schedule().map(CronSchedule::expression),
            next_fire = ?next_fire.as_ref().map(format_iso8601),
            "Pipeline registered"
        );
        self.entries.push(ScheduleEntry {
            definition: Arc::new(definition),
            next_fire,
        });
        Ok(())
    }

    /// Returns registered pipeline names in registration order.
    #[must_use]
    pub fn pipelines(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.definition.name()).collect()
    }

    /// Returns a registered definition.
    #[must_use]
    pub fn definition(&self, pipeline: &str) -> Option<&PipelineDefinition> {
        self.entry(pipeline).map(|e| e.definition.as_ref())
    }

    /// Returns the next-fire instant of a pipeline.
    #[must_use]
    pub fn next_fire(&self, pipeline: &str) -> Option<Timestamp> {
        self.entry(pipeline).and_then(|e| e.next_fire)
    }

    /// Applies next-fire instants from a checkpoint.
    ///
    /// An instant already in the past fires once on the next tick. Entries
    /// for pipelines that are no longer registered are ignored.
    pub fn restore(&mut self, checkpoint: &SchedulerCheckpoint) {
        for (pipeline, next_fire) in &checkpoint.next_fire {
            let Some(entry) = self.entries.iter_mut().find(|e| e.definition.name() == pipeline) else {
                debug!(pipeline = %pipeline, "Ignoring checkpoint entry for unregistered pipeline");
                continue;
            };
            if entry.definition.schedule().is_none() {
                continue;
            }
            entry.next_fire = Some(*next_fire);
            info!(pipeline = %pipeline, next_fire = %format_iso8601(next_fire), "Restored next fire");
            self.event_sink.try_emit(
                "schedule.restored",
                Some(json!({ "pipeline": pipeline, "next_fire": next_fire })),
            );
        }
    }

    /// Captures the current next-fire instants.
    #[must_use]
    pub fn checkpoint(&self, now: Timestamp) -> SchedulerCheckpoint {
        let next_fire: BTreeMap<String, Timestamp> = self
            .entries
            .iter()
            .filter_map(|e| e.next_fire.map(|t| (e.definition.name().to_string(), t)))
            .collect();
        SchedulerCheckpoint::new(now, next_fire)
    }

    /// Fires every pipeline whose next-fire instant is at or before `now`.
    ///
    /// Dispatched runs are spawned onto the current Tokio runtime. When any
    /// pipeline fired, the checkpoint is written before returning.
    pub async fn tick(&mut self, now: Timestamp) -> Vec<FireRecord> {
        let due: Vec<(usize, Timestamp)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.next_fire.filter(|t| *t <= now).map(|t| (i, t)))
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for (index, scheduled_for) in due {
            let definition = Arc::clone(&self.entries[index].definition);
            let record = self.fire(&definition, scheduled_for, now);
            self.entries[index].next_fire = definition.schedule().and_then(|s| s.next_after(now));
            fired.push(record);
        }

        if !fired.is_empty() {
            self.persist_checkpoint(now).await;
        }
        fired
    }

    /// Starts a run immediately, subject to the single-instance guard.
    ///
    /// The pipeline's next-fire instant is not changed.
    ///
    /// # Errors
    ///
    /// Returns [`NightflowError::UnknownPipeline`] for unregistered names.
    pub fn trigger_now(&mut self, pipeline: &str) -> Result<FireRecord, NightflowError> {
        let definition = self
            .entry(pipeline)
            .map(|e| Arc::clone(&e.definition))
            .ok_or_else(|| NightflowError::UnknownPipeline(pipeline.to_string()))?;
        let now = now_utc();
        Ok(self.fire(&definition, now, now))
    }

    /// Requests cancellation of the in-flight run of `pipeline`.
    ///
    /// Returns false if no run is in flight.
    pub fn cancel(&self, pipeline: &str, reason: impl Into<String>) -> bool {
        let active = self.active.lock().get(pipeline).cloned();
        match active {
            Some(run) => {
                let reason = reason.into();
                info!(pipeline = %pipeline, run_id = %run.run_id, reason = %reason, "Cancelling run");
                run.cancel.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Requests cancellation of every in-flight run.
    pub fn cancel_all(&self, reason: &str) {
        let active: Vec<ActiveRun> = self.active.lock().values().cloned().collect();
        for run in active {
            run.cancel.cancel(reason);
        }
    }

    /// Returns true if a run of `pipeline` is in flight.
    #[must_use]
    pub fn is_running(&self, pipeline: &str) -> bool {
        self.active.lock().contains_key(pipeline)
    }

    /// Returns the in-flight run of `pipeline`.
    #[must_use]
    pub fn active_run(&self, pipeline: &str) -> Option<RunId> {
        self.active.lock().get(pipeline).map(|a| a.run_id)
    }

    /// Returns archived terminal runs, oldest first.
    #[must_use]
    pub fn recent_runs(&self) -> Vec<PipelineRun> {
        self.archive.lock().iter().cloned().collect()
    }

    /// Returns the latest archived run of `pipeline`.
    #[must_use]
    pub fn last_run(&self, pipeline: &str) -> Option<PipelineRun> {
        self.archive
            .lock()
            .iter()
            .rev()
            .find(|r| r.pipeline() == pipeline)
            .cloned()
    }

    /// Returns recent firings, oldest first.
    pub fn fire_history(&self) -> impl Iterator<Item = &FireRecord> + '_ {
        self.history.iter()
    }

    /// Collects finished run tasks without waiting.
    pub fn reap(&mut self) {
        while let Some(result) = self.runs.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Run task ended abnormally");
            }
        }
    }

    /// Waits until every dispatched run has finished.
    pub async fn wait_idle(&mut self) {
        while let Some(result) = self.runs.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Run task ended abnormally");
            }
        }
    }

    /// Ticks on the configured cadence until `shutdown` completes.
    ///
    /// On shutdown in-flight runs are cancelled and awaited, then a final
    /// checkpoint is written.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            pipelines = self.entries.len(),
            tick_secs = self.config.tick_interval.as_secs(),
            "Scheduler started"
        );
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    self.reap();
                    self.tick(now_utc()).await;
                }
            }
        }

        info!("Scheduler shutting down");
        self.cancel_all("scheduler shutting down");
        self.wait_idle().await;
        self.persist_checkpoint(now_utc()).await;
    }

    fn entry(&self, pipeline: &str) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.definition.name() == pipeline)
    }

    fn fire(&mut self, definition: &Arc<PipelineDefinition>, scheduled_for: Timestamp, now: Timestamp) -> FireRecord {
        let pipeline = definition.name().to_string();
        let action = match self.try_dispatch(definition) {
            Ok(run_id) => {
                info!(
                    pipeline = %pipeline,
                    run_id = %run_id,
                    scheduled_for = %format_iso8601(&scheduled_for),
                    "Pipeline fired"
                );
                self.event_sink.try_emit(
                    "schedule.fired",
                    Some(json!({
                        "pipeline": pipeline,
                        "run_id": run_id,
                        "scheduled_for": scheduled_for,
                    })),
                );
                FireAction::Dispatched { run_id }
            }
            Err(active_run) => {
                warn!(
                    pipeline = %pipeline,
                    active_run = %active_run,
                    scheduled_for = %format_iso8601(&scheduled_for),
                    "Skipping fire: previous run still in flight"
                );
                self.event_sink.try_emit(
                    "schedule.skipped",
                    Some(json!({
                        "pipeline": pipeline,
                        "active_run": active_run,
                        "scheduled_for": scheduled_for,
                        "reason": "overlapping run",
                    })),
                );
                FireAction::SkippedOverlap { active_run }
            }
        };

        let record = FireRecord {
            pipeline,
            scheduled_for,
            fired_at: now,
            action,
        };
        if self.history.len() == FIRE_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());
        record
    }

    /// Claims the pipeline's single-instance slot and spawns the run.
    ///
    /// Returns the in-flight run's id if the slot is taken.
    fn try_dispatch(&mut self, definition: &Arc<PipelineDefinition>) -> Result<RunId, RunId> {
        let pipeline = definition.name().to_string();
        let run = PipelineRun::new(definition);
        let run_id = run.run_id();
        let cancel = Arc::new(CancellationToken::new());

        {
            let mut active = self.active.lock();
            if let Some(existing) = active.get(&pipeline) {
                return Err(existing.run_id);
            }
            active.insert(
                pipeline.clone(),
                ActiveRun {
                    run_id,
                    cancel: Arc::clone(&cancel),
                },
            );
        }

        let guard = ActiveRunGuard {
            active: Arc::clone(&self.active),
            pipeline,
            run_id,
        };
        let controller = Arc::clone(&self.controller);
        let archive = Arc::clone(&self.archive);
        let capacity = self.config.archive_capacity;
        let definition = Arc::clone(definition);

        self.runs.spawn(async move {
            // Dropped last, after the run is archived.
            let _slot = guard;
            let finished = controller.execute(&definition, run, &cancel).await;
            let mut archive = archive.lock();
            if capacity > 0 {
                if archive.len() >= capacity {
                    archive.pop_front();
                }
                archive.push_back(finished);
            }
        });
        Ok(run_id)
    }

    async fn persist_checkpoint(&self, now: Timestamp) {
        let Some(path) = &self.config.checkpoint_path else {
            return;
        };
        if let Err(e) = self.checkpoint(now).save(path).await {
            warn!(path = %path.display(), error = %e, "Failed to write scheduler checkpoint");
        }
    }
}
