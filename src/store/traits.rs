//! Store traits — the task and template collections the core depends on.
//!
//! Every call takes an explicit [`Scope`]. Backends publish a [`StoreChange`]
//! after each successful write; [`live_tasks`] and [`live_templates`] turn those
//! notifications into streams of full snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::DatabaseError;
use crate::session::Scope;
use crate::tasks::model::{NewTask, NewTemplate, RecurringTemplate, TaskItem, TaskPatch, TemplatePatch};

/// Default broadcast channel capacity for change feeds.
pub const CHANGE_FEED_CAPACITY: usize = 256;

/// Which collection changed, and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Tasks { user_id: String },
    Templates { user_id: String },
}

impl StoreChange {
    pub fn tasks(scope: &Scope) -> Self {
        StoreChange::Tasks {
            user_id: scope.user_id.clone(),
        }
    }

    pub fn templates(scope: &Scope) -> Self {
        StoreChange::Templates {
            user_id: scope.user_id.clone(),
        }
    }

    pub fn is_tasks(&self) -> bool {
        matches!(self, StoreChange::Tasks { .. })
    }

    pub fn is_templates(&self) -> bool {
        matches!(self, StoreChange::Templates { .. })
    }

    /// Whether this change belongs to `scope`.
    pub fn is_for(&self, scope: &Scope) -> bool {
        match self {
            StoreChange::Tasks { user_id } | StoreChange::Templates { user_id } => {
                *user_id == scope.user_id
            }
        }
    }
}

/// Durable collection of task instances.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks in the scope, ordered by date.
    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<TaskItem>, DatabaseError>;

    /// Tasks dated exactly `date`.
    async fn list_tasks_on(
        &self,
        scope: &Scope,
        date: NaiveDate,
    ) -> Result<Vec<TaskItem>, DatabaseError>;

    /// Tasks materialized from `template_id` on `date`.
    async fn list_tasks_for_template(
        &self,
        scope: &Scope,
        template_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TaskItem>, DatabaseError>;

    async fn get_task(&self, scope: &Scope, id: &str) -> Result<Option<TaskItem>, DatabaseError>;

    /// Store a new task and return its id.
    ///
    /// Fails with [`DatabaseError::Duplicate`] when the task carries a template
    /// reference and an instance for the same (template, date) already exists.
    async fn create_task(&self, scope: &Scope, task: &NewTask) -> Result<String, DatabaseError>;

    /// Apply a partial update. Fails with [`DatabaseError::NotFound`] for unknown ids.
    async fn update_task(
        &self,
        scope: &Scope,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<(), DatabaseError>;

    /// Returns `false` if nothing was deleted.
    async fn delete_task(&self, scope: &Scope, id: &str) -> Result<bool, DatabaseError>;

    /// Delete every task dated before `date`. Returns the number removed.
    async fn delete_tasks_before(
        &self,
        scope: &Scope,
        date: NaiveDate,
    ) -> Result<usize, DatabaseError>;

    /// Subscribe to change notifications for the task collection.
    fn subscribe_tasks(&self) -> broadcast::Receiver<StoreChange>;
}

/// Durable collection of recurring templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn list_templates(&self, scope: &Scope) -> Result<Vec<RecurringTemplate>, DatabaseError>;

    async fn get_template(
        &self,
        scope: &Scope,
        id: &str,
    ) -> Result<Option<RecurringTemplate>, DatabaseError>;

    async fn create_template(
        &self,
        scope: &Scope,
        template: &NewTemplate,
    ) -> Result<String, DatabaseError>;

    /// Apply a partial update and return the resulting template.
    async fn update_template(
        &self,
        scope: &Scope,
        id: &str,
        patch: &TemplatePatch,
    ) -> Result<RecurringTemplate, DatabaseError>;

    /// Returns `false` if nothing was deleted. Materialized tasks are never touched.
    async fn delete_template(&self, scope: &Scope, id: &str) -> Result<bool, DatabaseError>;

    /// Subscribe to change notifications for the template collection.
    fn subscribe_templates(&self) -> broadcast::Receiver<StoreChange>;
}

/// Turn a change receiver into a stream that yields once immediately and once per
/// relevant change. A lagged receiver counts as a change.
fn refresh_signals(
    rx: broadcast::Receiver<StoreChange>,
    scope: Scope,
    kind: fn(&StoreChange) -> bool,
) -> BoxStream<'static, ()> {
    let changes = BroadcastStream::new(rx).filter_map(move |event| {
        let relevant = match event {
            Ok(change) => kind(&change) && change.is_for(&scope),
            Err(_lagged) => true,
        };
        future::ready(relevant.then_some(()))
    });
    stream::once(future::ready(())).chain(changes).boxed()
}

/// Live view of a scope's tasks: the current set, then a fresh set after every change.
pub fn live_tasks(
    store: Arc<dyn TaskStore>,
    scope: Scope,
) -> BoxStream<'static, Result<Vec<TaskItem>, DatabaseError>> {
    let signals = refresh_signals(store.subscribe_tasks(), scope.clone(), StoreChange::is_tasks);
    signals
        .then(move |()| {
            let store = Arc::clone(&store);
            let scope = scope.clone();
            async move { store.list_tasks(&scope).await }
        })
        .boxed()
}

/// Live view of a scope's templates: the current set, then a fresh set after every change.
pub fn live_templates(
    store: Arc<dyn TemplateStore>,
    scope: Scope,
) -> BoxStream<'static, Result<Vec<RecurringTemplate>, DatabaseError>> {
    let signals = refresh_signals(
        store.subscribe_templates(),
        scope.clone(),
        StoreChange::is_templates,
    );
    signals
        .then(move |()| {
            let store = Arc::clone(&store);
            let scope = scope.clone();
            async move { store.list_templates(&scope).await }
        })
        .boxed()
}
