//! Planner service — the operations a signed-in user performs.
//!
//! Every mutation resolves the session scope first, then validates, and only then
//! touches a store. Template changes run the sync orchestrator so that today's
//! instances reflect them before the call returns.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RetentionPolicy;
use crate::error::{DatabaseError, Error, Result};
use crate::recurrence::sync::{SyncOrchestrator, SyncTrigger};
use crate::session::{Scope, Session};
use crate::store::{TaskStore, TemplateStore};
use crate::tasks::model::{
    NewTemplate, RecurringTemplate, TaskDraft, TaskItem, TaskPatch, TemplatePatch,
};

pub struct Planner {
    session: Session,
    tasks: Arc<dyn TaskStore>,
    templates: Arc<dyn TemplateStore>,
    clock: Arc<dyn Clock>,
    orchestrator: Option<Arc<SyncOrchestrator>>,
}

impl Planner {
    pub fn new(
        session: Session,
        tasks: Arc<dyn TaskStore>,
        templates: Arc<dyn TemplateStore>,
        clock: Arc<dyn Clock>,
        retention: RetentionPolicy,
    ) -> Self {
        let orchestrator = session.scope().map(|scope| {
            Arc::new(SyncOrchestrator::new(
                Arc::clone(&tasks),
                Arc::clone(&templates),
                Arc::clone(&clock),
                scope.clone(),
                retention,
            ))
        });
        Self {
            session,
            tasks,
            templates,
            clock,
            orchestrator,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tasks_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn templates_store(&self) -> &Arc<dyn TemplateStore> {
        &self.templates
    }

    /// The orchestrator bound to this session's scope; `None` when signed out.
    pub fn orchestrator(&self) -> Option<&Arc<SyncOrchestrator>> {
        self.orchestrator.as_ref()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn scoped(&self) -> Result<(&Scope, &Arc<SyncOrchestrator>)> {
        let scope = self.session.require()?;
        let orchestrator = self.orchestrator.as_ref().ok_or(Error::Unauthenticated)?;
        Ok((scope, orchestrator))
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// The retained task set (dated today or later).
    pub async fn tasks(&self) -> Result<Vec<TaskItem>> {
        let (_, orchestrator) = self.scoped()?;
        Ok(orchestrator.load_tasks().await?)
    }

    pub async fn templates(&self) -> Result<Vec<RecurringTemplate>> {
        let scope = self.session.require()?;
        Ok(self.templates.list_templates(scope).await?)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    pub async fn add_task(&self, draft: TaskDraft) -> Result<TaskItem> {
        let scope = self.session.require()?;
        let task = draft.validate(self.clock.today())?;
        let id = self.tasks.create_task(scope, &task).await?;
        info!(id = %id, date = %task.date, "Task added");
        Ok(task.into_item(id))
    }

    pub async fn edit_task(&self, id: &str, patch: TaskPatch) -> Result<TaskItem> {
        let scope = self.session.require()?;
        patch.validate(self.clock.today())?;
        if !patch.is_empty() {
            self.tasks.update_task(scope, id, &patch).await?;
        }
        self.fetch_task(scope, id).await
    }

    pub async fn set_done(&self, id: &str, done: bool) -> Result<TaskItem> {
        let scope = self.session.require()?;
        let patch = TaskPatch {
            done: Some(done),
            ..Default::default()
        };
        self.tasks.update_task(scope, id, &patch).await?;
        self.fetch_task(scope, id).await
    }

    /// Returns `false` when no task had that id.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        let scope = self.session.require()?;
        Ok(self.tasks.delete_task(scope, id).await?)
    }

    async fn fetch_task(&self, scope: &Scope, id: &str) -> Result<TaskItem> {
        self.tasks.get_task(scope, id).await?.ok_or_else(|| {
            DatabaseError::NotFound {
                entity: "task".into(),
                id: id.into(),
            }
            .into()
        })
    }

    // ── Templates ───────────────────────────────────────────────────

    /// Store a template and materialize today's instance if it is due.
    ///
    /// A failed materialization is logged, not returned: the template is stored and
    /// the next sync run retries.
    pub async fn add_template(&self, template: NewTemplate) -> Result<RecurringTemplate> {
        let (scope, orchestrator) = self.scoped()?;
        template.validate()?;
        let id = self.templates.create_template(scope, &template).await?;
        info!(id = %id, weekday = template.weekday, "Template added");

        if let Err(e) = orchestrator.run(SyncTrigger::TemplatesChanged).await {
            warn!(template_id = %id, error = %e, "Sync after template add failed");
        }
        Ok(template.into_template(id))
    }

    /// Update a template. Title, description and priority changes are copied onto
    /// today's instance; propagation failures are returned.
    pub async fn edit_template(&self, id: &str, patch: TemplatePatch) -> Result<RecurringTemplate> {
        let (scope, orchestrator) = self.scoped()?;
        patch.validate()?;
        let updated = self.templates.update_template(scope, id, &patch).await?;

        if patch.touches_task_fields() {
            orchestrator.propagate_template_edit(&updated).await?;
        }
        if patch.weekday.is_some()
            && let Err(e) = orchestrator.run(SyncTrigger::TemplatesChanged).await
        {
            warn!(template_id = %id, error = %e, "Sync after template edit failed");
        }
        Ok(updated)
    }

    /// Delete a template. Tasks already materialized from it are kept.
    pub async fn delete_template(&self, id: &str) -> Result<bool> {
        let scope = self.session.require()?;
        let deleted = self.templates.delete_template(scope, id).await?;
        if deleted {
            info!(id = %id, "Template deleted");
        }
        Ok(deleted)
    }
}
