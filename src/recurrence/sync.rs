//! Sync orchestrator — keeps today's recurring instances materialized.
//!
//! One procedure ([`SyncOrchestrator::run`]) does the work: read the clock, load
//! the task set fresh from the store (retention applied), ask the engine what is
//! missing, and create it. A run lock keeps runs from overlapping whether they
//! come from the background loop or from a direct caller.
//!
//! The background loop ([`spawn_sync_loop`]) is the trigger queue. It wakes on
//! explicit triggers, on store change notifications for its scope, and on a
//! periodic day-rollover check; triggers that pile up during a run are coalesced
//! into one follow-up run.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RetentionPolicy;
use crate::error::{DatabaseError, SyncError};
use crate::recurrence::engine::compute_missing_instances;
use crate::recurrence::retention::{count_expired, retain_current};
use crate::session::Scope;
use crate::store::{StoreChange, TaskStore, TemplateStore};
use crate::tasks::model::{RecurringTemplate, TaskItem, TaskPatch};

/// Why a sync run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    InitialLoad,
    TemplatesChanged,
    TasksChanged,
    DayRollover,
    Manual,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncTrigger::InitialLoad => "initial_load",
            SyncTrigger::TemplatesChanged => "templates_changed",
            SyncTrigger::TasksChanged => "tasks_changed",
            SyncTrigger::DayRollover => "day_rollover",
            SyncTrigger::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub today: NaiveDate,
    /// Requests the engine produced.
    pub requested: usize,
    /// Ids of the instances created by this run.
    pub created: Vec<String>,
    /// Requests the store rejected because the instance already existed.
    pub already_present: usize,
    /// Expired tasks deleted from the store (delete-on-load policy only).
    pub purged: usize,
}

/// Drives the recurrence engine against one account's stores.
pub struct SyncOrchestrator {
    tasks: Arc<dyn TaskStore>,
    templates: Arc<dyn TemplateStore>,
    clock: Arc<dyn Clock>,
    scope: Scope,
    retention: RetentionPolicy,
    run_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        templates: Arc<dyn TemplateStore>,
        clock: Arc<dyn Clock>,
        scope: Scope,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            tasks,
            templates,
            clock,
            scope,
            retention,
            run_lock: Mutex::new(()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Load the task set with retention applied.
    ///
    /// Under [`RetentionPolicy::DeleteExpired`] expired rows are also removed from
    /// the store.
    pub async fn load_tasks(&self) -> Result<Vec<TaskItem>, DatabaseError> {
        let today = self.clock.today();
        let (tasks, _purged) = self.load_retained(today).await?;
        Ok(tasks)
    }

    async fn load_retained(&self, today: NaiveDate) -> Result<(Vec<TaskItem>, usize), DatabaseError> {
        let all = self.tasks.list_tasks(&self.scope).await?;
        let expired = count_expired(&all, today);

        let purged = if expired > 0 && self.retention == RetentionPolicy::DeleteExpired {
            self.tasks.delete_tasks_before(&self.scope, today).await?
        } else {
            0
        };

        Ok((retain_current(all, today), purged))
    }

    /// Materialize every instance that is due today and missing.
    ///
    /// Store write failures are collected and returned as [`SyncError::Materialize`];
    /// nothing is remembered about them, so the next run tries again.
    pub async fn run(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let _guard = self.run_lock.lock().await;

        let today = self.clock.today();
        let weekday = self.clock.weekday_of(today);

        let (current, purged) = self.load_retained(today).await.map_err(SyncError::Load)?;
        let templates = self
            .templates
            .list_templates(&self.scope)
            .await
            .map_err(SyncError::Load)?;

        let existing_today: Vec<TaskItem> =
            current.into_iter().filter(|t| t.date == today).collect();
        let requests = compute_missing_instances(&templates, &existing_today, today, weekday);

        let mut report = SyncReport {
            today,
            requested: requests.len(),
            created: Vec::new(),
            already_present: 0,
            purged,
        };

        let mut failed: Vec<String> = Vec::new();
        let mut first_reason: Option<String> = None;

        for request in &requests {
            let template_id = request.template_id.clone().unwrap_or_default();
            match self.tasks.create_task(&self.scope, request).await {
                Ok(id) => {
                    debug!(task_id = %id, template_id = %template_id, "Materialized recurring task");
                    report.created.push(id);
                }
                Err(DatabaseError::Duplicate { .. }) => {
                    debug!(template_id = %template_id, "Instance already present, skipping");
                    report.already_present += 1;
                }
                Err(e) => {
                    warn!(template_id = %template_id, error = %e, "Failed to materialize recurring task");
                    first_reason.get_or_insert_with(|| e.to_string());
                    failed.push(template_id);
                }
            }
        }

        if !report.created.is_empty() || report.purged > 0 {
            info!(
                scope = %self.scope,
                trigger = %trigger,
                today = %today,
                created = report.created.len(),
                purged = report.purged,
                "Sync run complete"
            );
        } else {
            debug!(scope = %self.scope, trigger = %trigger, today = %today, "Sync run: nothing to do");
        }

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(SyncError::Materialize {
                date: today,
                template_ids: failed,
                reason: first_reason.unwrap_or_default(),
            })
        }
    }

    /// Copy a template's title, description and priority onto the instance
    /// materialized from it today. Completion and date are left alone; instances on
    /// other dates are not touched. Returns the number of tasks updated.
    pub async fn propagate_template_edit(
        &self,
        template: &RecurringTemplate,
    ) -> Result<usize, SyncError> {
        let _guard = self.run_lock.lock().await;
        let today = self.clock.today();

        let instances = self
            .tasks
            .list_tasks_for_template(&self.scope, &template.id, today)
            .await
            .map_err(|e| SyncError::Propagate {
                template_id: template.id.clone(),
                reason: e.to_string(),
            })?;

        let patch = TaskPatch {
            title: Some(template.title.clone()),
            description: Some(template.description.clone()),
            priority: Some(template.priority),
            ..Default::default()
        };

        for task in &instances {
            self.tasks
                .update_task(&self.scope, &task.id, &patch)
                .await
                .map_err(|e| SyncError::Propagate {
                    template_id: template.id.clone(),
                    reason: e.to_string(),
                })?;
        }

        if !instances.is_empty() {
            debug!(template_id = %template.id, updated = instances.len(), "Propagated template edit");
        }
        Ok(instances.len())
    }
}

// ── Background loop ─────────────────────────────────────────────────

/// A queued trigger, optionally waiting for the run's outcome.
struct SyncRequest {
    trigger: SyncTrigger,
    reply: Option<oneshot::Sender<Result<SyncReport, SyncError>>>,
}

/// Handle to a running sync loop. Dropping every handle stops the loop.
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncRequest>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SyncHandle {
    /// Queue a run without waiting for it.
    pub fn trigger(&self, trigger: SyncTrigger) -> Result<(), SyncError> {
        self.tx
            .send(SyncRequest {
                trigger,
                reply: None,
            })
            .map_err(|_| SyncError::Closed)
    }

    /// Queue a run and wait for its outcome.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SyncRequest {
                trigger: SyncTrigger::Manual,
                reply: Some(reply_tx),
            })
            .map_err(|_| SyncError::Closed)?;
        reply_rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Stop the loop after any in-flight run and release its store subscriptions.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Sync loop task ended abnormally");
        }
    }
}

/// Spawn the sync loop for one orchestrator. Queues an initial-load run.
pub fn spawn_sync_loop(orchestrator: Arc<SyncOrchestrator>, day_check: Duration) -> SyncHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Subscribe before the first run so no change is missed
    let task_changes = orchestrator.tasks.subscribe_tasks();
    let template_changes = orchestrator.templates.subscribe_templates();

    let join = tokio::spawn(run_loop(
        orchestrator,
        rx,
        shutdown_rx,
        task_changes,
        template_changes,
        day_check,
    ));

    let handle = SyncHandle {
        tx,
        shutdown_tx,
        join,
    };
    if let Err(e) = handle.trigger(SyncTrigger::InitialLoad) {
        warn!(error = %e, "Failed to queue initial sync");
    }
    handle
}

/// Map a store notification to a trigger, if it concerns this scope.
fn change_trigger(
    result: Result<StoreChange, broadcast::error::RecvError>,
    scope: &Scope,
    kind: SyncTrigger,
) -> Option<SyncTrigger> {
    match result {
        Ok(change) if change.is_for(scope) => {
            let matches_kind = match kind {
                SyncTrigger::TasksChanged => change.is_tasks(),
                SyncTrigger::TemplatesChanged => change.is_templates(),
                _ => false,
            };
            matches_kind.then_some(kind)
        }
        Ok(_) => None,
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(missed = n, "Sync loop lagged behind store changes");
            Some(kind)
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

async fn run_loop(
    orchestrator: Arc<SyncOrchestrator>,
    mut rx: mpsc::UnboundedReceiver<SyncRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut task_changes: broadcast::Receiver<StoreChange>,
    mut template_changes: broadcast::Receiver<StoreChange>,
    day_check: Duration,
) {
    let scope = orchestrator.scope().clone();
    info!(scope = %scope, "Sync loop started");

    let mut ticker = tokio::time::interval(day_check);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip immediate first tick
    ticker.tick().await;

    let mut last_day = orchestrator.clock().today();

    loop {
        let mut replies: Vec<oneshot::Sender<Result<SyncReport, SyncError>>> = Vec::new();

        let trigger = tokio::select! {
            _ = shutdown_rx.changed() => break,
            request = rx.recv() => match request {
                Some(req) => {
                    replies.extend(req.reply);
                    req.trigger
                }
                None => break,
            },
            result = task_changes.recv() => {
                match change_trigger(result, &scope, SyncTrigger::TasksChanged) {
                    Some(t) => t,
                    None => continue,
                }
            }
            result = template_changes.recv() => {
                match change_trigger(result, &scope, SyncTrigger::TemplatesChanged) {
                    Some(t) => t,
                    None => continue,
                }
            }
            _ = ticker.tick() => {
                let today = orchestrator.clock().today();
                if today == last_day {
                    continue;
                }
                debug!(from = %last_day, to = %today, "Calendar day rolled over");
                SyncTrigger::DayRollover
            }
        };

        // Coalesce whatever queued up behind this trigger
        let mut coalesced = 0usize;
        while let Ok(req) = rx.try_recv() {
            replies.extend(req.reply);
            coalesced += 1;
        }
        while task_changes.try_recv().is_ok() {
            coalesced += 1;
        }
        while template_changes.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            debug!(trigger = %trigger, coalesced, "Coalesced queued sync triggers");
        }

        let result = orchestrator.run(trigger).await;
        match &result {
            Ok(report) => last_day = report.today,
            Err(e) => warn!(trigger = %trigger, error = %e, "Sync run failed, will retry on next trigger"),
        }

        for reply in replies {
            let _ = reply.send(result.clone());
        }
    }

    info!(scope = %scope, "Sync loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::clock::FixedClock;
    use crate::store::{LibSqlBackend, MemoryStore};
    use crate::tasks::model::{NewTask, NewTemplate, Priority, TemplatePatch};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monday() -> NaiveDate {
        date(2024, 6, 10)
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        scope: Scope,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(FixedClock::new(monday())),
                scope: Scope::new("u1"),
            }
        }

        fn orchestrator(&self, retention: RetentionPolicy) -> SyncOrchestrator {
            SyncOrchestrator::new(
                self.store.clone(),
                self.store.clone(),
                self.clock.clone(),
                self.scope.clone(),
                retention,
            )
        }

        async fn template(&self, title: &str, weekday: u8) -> String {
            self.store
                .create_template(&self.scope, &NewTemplate::new(title, weekday))
                .await
                .unwrap()
        }

        async fn tasks(&self) -> Vec<TaskItem> {
            self.store.list_tasks(&self.scope).await.unwrap()
        }
    }

    /// Task store whose creates fail while `failures_left` is non-zero.
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn list_tasks(&self, scope: &Scope) -> Result<Vec<TaskItem>, DatabaseError> {
            self.inner.list_tasks(scope).await
        }
        async fn list_tasks_on(
            &self,
            scope: &Scope,
            date: NaiveDate,
        ) -> Result<Vec<TaskItem>, DatabaseError> {
            self.inner.list_tasks_on(scope, date).await
        }
        async fn list_tasks_for_template(
            &self,
            scope: &Scope,
            template_id: &str,
            date: NaiveDate,
        ) -> Result<Vec<TaskItem>, DatabaseError> {
            self.inner.list_tasks_for_template(scope, template_id, date).await
        }
        async fn get_task(&self, scope: &Scope, id: &str) -> Result<Option<TaskItem>, DatabaseError> {
            self.inner.get_task(scope, id).await
        }
        async fn create_task(&self, scope: &Scope, task: &NewTask) -> Result<String, DatabaseError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DatabaseError::Query("connection reset".into()));
            }
            self.inner.create_task(scope, task).await
        }
        async fn update_task(
            &self,
            scope: &Scope,
            id: &str,
            patch: &TaskPatch,
        ) -> Result<(), DatabaseError> {
            self.inner.update_task(scope, id, patch).await
        }
        async fn delete_task(&self, scope: &Scope, id: &str) -> Result<bool, DatabaseError> {
            self.inner.delete_task(scope, id).await
        }
        async fn delete_tasks_before(
            &self,
            scope: &Scope,
            date: NaiveDate,
        ) -> Result<usize, DatabaseError> {
            self.inner.delete_tasks_before(scope, date).await
        }
        fn subscribe_tasks(&self) -> broadcast::Receiver<StoreChange> {
            self.inner.subscribe_tasks()
        }
    }

    #[tokio::test]
    async fn materializes_due_template_once() {
        let fx = Fixture::new();
        let r1 = fx.template("Standup", 1).await;
        let orch = fx.orchestrator(RetentionPolicy::FilterOnly);

        let first = orch.run(SyncTrigger::InitialLoad).await.unwrap();
        assert_eq!(first.requested, 1);
        assert_eq!(first.created.len(), 1);

        let second = orch.run(SyncTrigger::TasksChanged).await.unwrap();
        assert_eq!(second.requested, 0);

        let tasks = fx.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].template_id.as_deref(), Some(r1.as_str()));
        assert_eq!(tasks[0].date, monday());
        assert!(!tasks[0].done);
    }

    #[tokio::test]
    async fn other_weekdays_not_materialized() {
        let fx = Fixture::new();
        fx.template("Gym", 3).await;
        let report = fx
            .orchestrator(RetentionPolicy::FilterOnly)
            .run(SyncTrigger::Manual)
            .await
            .unwrap();
        assert_eq!(report.requested, 0);
        assert!(fx.tasks().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_create_one_instance() {
        let fx = Fixture::new();
        fx.template("Standup", 1).await;
        let orch = Arc::new(fx.orchestrator(RetentionPolicy::FilterOnly));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.run(SyncTrigger::TasksChanged).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(fx.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn completed_instance_is_not_recreated() {
        let fx = Fixture::new();
        fx.template("Standup", 1).await;
        let orch = fx.orchestrator(RetentionPolicy::FilterOnly);
        let report = orch.run(SyncTrigger::InitialLoad).await.unwrap();

        let done = TaskPatch {
            done: Some(true),
            ..Default::default()
        };
        fx.store
            .update_task(&fx.scope, &report.created[0], &done)
            .await
            .unwrap();

        let again = orch.run(SyncTrigger::TasksChanged).await.unwrap();
        assert_eq!(again.requested, 0);
        assert_eq!(fx.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_create_is_reported_and_retried() {
        let fx = Fixture::new();
        let r1 = fx.template("Standup", 1).await;
        let flaky = Arc::new(FlakyStore {
            inner: fx.store.clone(),
            failures_left: AtomicUsize::new(1),
        });
        let orch = SyncOrchestrator::new(
            flaky,
            fx.store.clone(),
            fx.clock.clone(),
            fx.scope.clone(),
            RetentionPolicy::FilterOnly,
        );

        let err = orch.run(SyncTrigger::InitialLoad).await.unwrap_err();
        match err {
            SyncError::Materialize {
                date: d,
                template_ids,
                reason,
            } => {
                assert_eq!(d, monday());
                assert_eq!(template_ids, vec![r1.clone()]);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("Expected Materialize, got {other:?}"),
        }
        assert!(fx.tasks().await.is_empty());

        let retry = orch.run(SyncTrigger::TasksChanged).await.unwrap();
        assert_eq!(retry.created.len(), 1);
        assert_eq!(fx.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn filter_only_keeps_expired_rows() {
        let fx = Fixture::new();
        for day in [9, 10, 11] {
            fx.store
                .create_task(&fx.scope, &NewTask::new(format!("d{day}"), date(2024, 6, day)))
                .await
                .unwrap();
        }
        let orch = fx.orchestrator(RetentionPolicy::FilterOnly);

        let loaded: Vec<NaiveDate> = orch.load_tasks().await.unwrap().iter().map(|t| t.date).collect();
        assert_eq!(loaded, vec![date(2024, 6, 10), date(2024, 6, 11)]);
        assert_eq!(fx.tasks().await.len(), 3);
    }

    #[tokio::test]
    async fn delete_expired_purges_on_load() {
        let fx = Fixture::new();
        for day in [8, 9, 10, 11] {
            fx.store
                .create_task(&fx.scope, &NewTask::new(format!("d{day}"), date(2024, 6, day)))
                .await
                .unwrap();
        }
        let orch = fx.orchestrator(RetentionPolicy::DeleteExpired);

        let report = orch.run(SyncTrigger::InitialLoad).await.unwrap();
        assert_eq!(report.purged, 2);

        let remaining: Vec<NaiveDate> = fx.tasks().await.iter().map(|t| t.date).collect();
        assert_eq!(remaining, vec![date(2024, 6, 10), date(2024, 6, 11)]);
    }

    #[tokio::test]
    async fn template_edit_updates_only_todays_instance() {
        let fx = Fixture::new();
        let r1 = fx.template("Standup", 1).await;
        let orch = fx.orchestrator(RetentionPolicy::FilterOnly);

        // An instance from next week under the same template (e.g. created manually)
        fx.store
            .create_task(
                &fx.scope,
                &NewTask::new("Standup", date(2024, 6, 17)).with_template(&r1),
            )
            .await
            .unwrap();
        let report = orch.run(SyncTrigger::InitialLoad).await.unwrap();
        let today_id = report.created[0].clone();

        fx.store
            .update_task(
                &fx.scope,
                &today_id,
                &TaskPatch {
                    done: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let patch = TemplatePatch {
            title: Some("Daily standup".into()),
            priority: Some(Priority::High),
            ..Default::default()
        };
        let updated = fx.store.update_template(&fx.scope, &r1, &patch).await.unwrap();
        assert_eq!(orch.propagate_template_edit(&updated).await.unwrap(), 1);

        let today_task = fx.store.get_task(&fx.scope, &today_id).await.unwrap().unwrap();
        assert_eq!(today_task.title, "Daily standup");
        assert_eq!(today_task.priority, Priority::High);
        assert!(today_task.done);
        assert_eq!(today_task.date, monday());

        let next_week = fx
            .store
            .list_tasks_on(&fx.scope, date(2024, 6, 17))
            .await
            .unwrap();
        assert_eq!(next_week[0].title, "Standup");
        assert_eq!(next_week[0].priority, Priority::Low);
    }

    #[tokio::test]
    async fn deleting_template_keeps_instances() {
        let fx = Fixture::new();
        let r1 = fx.template("Standup", 1).await;
        let orch = fx.orchestrator(RetentionPolicy::FilterOnly);
        orch.run(SyncTrigger::InitialLoad).await.unwrap();

        fx.store.delete_template(&fx.scope, &r1).await.unwrap();
        let report = orch.run(SyncTrigger::TemplatesChanged).await.unwrap();
        assert_eq!(report.requested, 0);

        let tasks = fx.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].template_id.as_deref(), Some(r1.as_str()));
    }

    #[tokio::test]
    async fn loop_materializes_on_start_and_on_template_change() {
        let fx = Fixture::new();
        fx.template("Standup", 1).await;
        let orch = Arc::new(fx.orchestrator(RetentionPolicy::FilterOnly));
        let handle = spawn_sync_loop(orch, Duration::from_secs(3600));

        // sync_now queues behind the initial load, so the instance exists afterwards
        handle.sync_now().await.unwrap();
        assert_eq!(fx.tasks().await.len(), 1);

        fx.template("Retro", 1).await;
        handle.sync_now().await.unwrap();
        assert_eq!(fx.tasks().await.len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn loop_reacts_to_store_changes_without_explicit_trigger() {
        let fx = Fixture::new();
        let orch = Arc::new(fx.orchestrator(RetentionPolicy::FilterOnly));
        let handle = spawn_sync_loop(orch, Duration::from_secs(3600));
        handle.sync_now().await.unwrap();

        let mut changes = fx.store.subscribe_tasks();
        fx.template("Standup", 1).await;

        // The loop's own write shows up as a task change
        let wait_for_task_change = async {
            loop {
                if changes.recv().await.unwrap().is_tasks() {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait_for_task_change)
            .await
            .expect("sync loop did not materialize");
        assert_eq!(fx.tasks().await.len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn loop_picks_up_new_day() {
        let fx = Fixture::new();
        fx.template("Standup", 1).await;
        fx.template("Gym", 2).await;
        let orch = Arc::new(fx.orchestrator(RetentionPolicy::FilterOnly));
        let handle = spawn_sync_loop(orch, Duration::from_millis(10));
        handle.sync_now().await.unwrap();
        assert_eq!(fx.tasks().await.len(), 1);

        let mut changes = fx.store.subscribe_tasks();
        fx.clock.set(date(2024, 6, 11));
        tokio::time::timeout(Duration::from_secs(5), changes.recv())
            .await
            .expect("day rollover did not trigger a run")
            .unwrap();

        let tuesday = fx.store.list_tasks_on(&fx.scope, date(2024, 6, 11)).await.unwrap();
        assert_eq!(tuesday.len(), 1);
        assert_eq!(tuesday[0].title, "Gym");

        handle.shutdown().await;
    }

    fn libsql_orchestrator(
        db: &Arc<LibSqlBackend>,
        clock: &Arc<FixedClock>,
        retention: RetentionPolicy,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            db.clone(),
            db.clone(),
            clock.clone(),
            Scope::new("u1"),
            retention,
        )
    }

    #[tokio::test]
    async fn libsql_template_edit_updates_only_todays_instance() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let clock = Arc::new(FixedClock::new(monday()));
        let scope = Scope::new("u1");
        let r1 = db
            .create_template(&scope, &NewTemplate::new("Standup", 1))
            .await
            .unwrap();
        db.create_task(&scope, &NewTask::new("Standup", date(2024, 6, 17)).with_template(&r1))
            .await
            .unwrap();

        let orch = libsql_orchestrator(&db, &clock, RetentionPolicy::FilterOnly);
        let report = orch.run(SyncTrigger::InitialLoad).await.unwrap();
        assert_eq!(report.created.len(), 1);
        let today_id = report.created[0].clone();

        let patch = TemplatePatch {
            title: Some("Daily standup".into()),
            description: Some("Zoom".into()),
            ..Default::default()
        };
        let updated = db.update_template(&scope, &r1, &patch).await.unwrap();
        assert_eq!(orch.propagate_template_edit(&updated).await.unwrap(), 1);

        let today_task = db.get_task(&scope, &today_id).await.unwrap().unwrap();
        assert_eq!(today_task.title, "Daily standup");
        assert_eq!(today_task.description, "Zoom");
        assert_eq!(today_task.date, monday());

        let next_week = db.list_tasks_on(&scope, date(2024, 6, 17)).await.unwrap();
        assert_eq!(next_week[0].title, "Standup");
    }

    #[tokio::test]
    async fn libsql_delete_expired_purges_on_run() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let clock = Arc::new(FixedClock::new(monday()));
        let scope = Scope::new("u1");
        for day in [8, 9, 10, 11] {
            db.create_task(&scope, &NewTask::new(format!("d{day}"), date(2024, 6, day)))
                .await
                .unwrap();
        }
        db.create_template(&scope, &NewTemplate::new("Standup", 1))
            .await
            .unwrap();

        let orch = libsql_orchestrator(&db, &clock, RetentionPolicy::DeleteExpired);
        let report = orch.run(SyncTrigger::InitialLoad).await.unwrap();
        assert_eq!(report.purged, 2);
        assert_eq!(report.created.len(), 1);

        let remaining: Vec<NaiveDate> = db
            .list_tasks(&scope)
            .await
            .unwrap()
            .iter()
            .map(|t| t.date)
            .collect();
        assert_eq!(remaining, vec![monday(), monday(), date(2024, 6, 11)]);

        let again = orch.run(SyncTrigger::TasksChanged).await.unwrap();
        assert_eq!(again.purged, 0);
        assert_eq!(again.requested, 0);
    }

    #[tokio::test]
    async fn queued_trigger_runs_without_waiting() {
        let fx = Fixture::new();
        fx.template("Gym", 2).await;
        let orch = Arc::new(fx.orchestrator(RetentionPolicy::FilterOnly));
        let handle = spawn_sync_loop(orch, Duration::from_secs(3600));
        handle.sync_now().await.unwrap();
        assert!(fx.tasks().await.is_empty());

        // A clock change raises no store event and the ticker is far off
        fx.clock.set(date(2024, 6, 11));
        let mut changes = fx.store.subscribe_tasks();
        handle.trigger(SyncTrigger::Manual).unwrap();

        let wait_for_task_change = async {
            loop {
                if changes.recv().await.unwrap().is_tasks() {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait_for_task_change)
            .await
            .expect("queued trigger did not run");
        assert_eq!(fx.tasks().await.len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn triggers_fail_after_shutdown() {
        let fx = Fixture::new();
        let orch = Arc::new(fx.orchestrator(RetentionPolicy::FilterOnly));
        let handle = spawn_sync_loop(orch, Duration::from_secs(3600));
        let tx = handle.tx.clone();
        handle.shutdown().await;

        let sent = tx.send(SyncRequest {
            trigger: SyncTrigger::Manual,
            reply: None,
        });
        assert!(sent.is_err());
    }
}
