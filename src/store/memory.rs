//! In-memory store — per-account task and template collections with a broadcast
//! change feed. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use super::traits::{CHANGE_FEED_CAPACITY, StoreChange, TaskStore, TemplateStore};
use crate::error::DatabaseError;
use crate::session::Scope;
use crate::tasks::model::{NewTask, NewTemplate, RecurringTemplate, TaskItem, TaskPatch, TemplatePatch};

/// In-memory backend implementing both store traits.
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, Vec<TaskItem>>>,
    templates: RwLock<HashMap<String, Vec<RecurringTemplate>>>,
    tx: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tasks: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            tx,
        }
    }

    fn notify(&self, change: StoreChange) {
        // Ok if nobody is listening
        let _ = self.tx.send(change);
    }
}

fn sorted(mut tasks: Vec<TaskItem>) -> Vec<TaskItem> {
    tasks.sort_by(|a, b| a.date.cmp(&b.date));
    tasks
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<TaskItem>, DatabaseError> {
        let tasks = self.tasks.read().await;
        Ok(sorted(tasks.get(&scope.user_id).cloned().unwrap_or_default()))
    }

    async fn list_tasks_on(
        &self,
        scope: &Scope,
        date: NaiveDate,
    ) -> Result<Vec<TaskItem>, DatabaseError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(&scope.user_id)
            .map(|all| all.iter().filter(|t| t.date == date).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_tasks_for_template(
        &self,
        scope: &Scope,
        template_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TaskItem>, DatabaseError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(&scope.user_id)
            .map(|all| {
                all.iter()
                    .filter(|t| t.date == date && t.template_id.as_deref() == Some(template_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_task(&self, scope: &Scope, id: &str) -> Result<Option<TaskItem>, DatabaseError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(&scope.user_id)
            .and_then(|all| all.iter().find(|t| t.id == id).cloned()))
    }

    async fn create_task(&self, scope: &Scope, task: &NewTask) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        {
            let mut tasks = self.tasks.write().await;
            let owned = tasks.entry(scope.user_id.clone()).or_default();

            if let Some(template_id) = task.template_id.as_deref()
                && owned
                    .iter()
                    .any(|t| t.date == task.date && t.template_id.as_deref() == Some(template_id))
            {
                return Err(DatabaseError::Duplicate {
                    template_id: template_id.to_string(),
                    date: task.date,
                });
            }

            owned.push(task.clone().into_item(id.clone()));
        }
        debug!(id = %id, scope = %scope, "Task created");
        self.notify(StoreChange::tasks(scope));
        Ok(id)
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<(), DatabaseError> {
        {
            let mut tasks = self.tasks.write().await;
            let not_found = || DatabaseError::NotFound {
                entity: "task".into(),
                id: id.to_string(),
            };
            let owned = tasks.get_mut(&scope.user_id).ok_or_else(not_found)?;
            let index = owned
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(not_found)?;

            let mut updated = owned[index].clone();
            patch.apply(&mut updated);

            if let Some(template_id) = updated.template_id.as_deref()
                && owned.iter().enumerate().any(|(i, t)| {
                    i != index
                        && t.date == updated.date
                        && t.template_id.as_deref() == Some(template_id)
                })
            {
                return Err(DatabaseError::Duplicate {
                    template_id: template_id.to_string(),
                    date: updated.date,
                });
            }

            owned[index] = updated;
        }
        self.notify(StoreChange::tasks(scope));
        Ok(())
    }

    async fn delete_task(&self, scope: &Scope, id: &str) -> Result<bool, DatabaseError> {
        let removed = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&scope.user_id) {
                Some(owned) => {
                    let before = owned.len();
                    owned.retain(|t| t.id != id);
                    owned.len() < before
                }
                None => false,
            }
        };
        if removed {
            self.notify(StoreChange::tasks(scope));
        }
        Ok(removed)
    }

    async fn delete_tasks_before(
        &self,
        scope: &Scope,
        date: NaiveDate,
    ) -> Result<usize, DatabaseError> {
        let removed = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&scope.user_id) {
                Some(owned) => {
                    let before = owned.len();
                    owned.retain(|t| t.date >= date);
                    before - owned.len()
                }
                None => 0,
            }
        };
        if removed > 0 {
            self.notify(StoreChange::tasks(scope));
        }
        Ok(removed)
    }

    fn subscribe_tasks(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_templates(&self, scope: &Scope) -> Result<Vec<RecurringTemplate>, DatabaseError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&scope.user_id).cloned().unwrap_or_default())
    }

    async fn get_template(
        &self,
        scope: &Scope,
        id: &str,
    ) -> Result<Option<RecurringTemplate>, DatabaseError> {
        let templates = self.templates.read().await;
        Ok(templates
            .get(&scope.user_id)
            .and_then(|all| all.iter().find(|t| t.id == id).cloned()))
    }

    async fn create_template(
        &self,
        scope: &Scope,
        template: &NewTemplate,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.templates
            .write()
            .await
            .entry(scope.user_id.clone())
            .or_default()
            .push(template.clone().into_template(id.clone()));
        debug!(id = %id, scope = %scope, "Template created");
        self.notify(StoreChange::templates(scope));
        Ok(id)
    }

    async fn update_template(
        &self,
        scope: &Scope,
        id: &str,
        patch: &TemplatePatch,
    ) -> Result<RecurringTemplate, DatabaseError> {
        let updated = {
            let mut templates = self.templates.write().await;
            let template = templates
                .get_mut(&scope.user_id)
                .and_then(|all| all.iter_mut().find(|t| t.id == id))
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "template".into(),
                    id: id.to_string(),
                })?;
            patch.apply(template);
            template.clone()
        };
        self.notify(StoreChange::templates(scope));
        Ok(updated)
    }

    async fn delete_template(&self, scope: &Scope, id: &str) -> Result<bool, DatabaseError> {
        let removed = {
            let mut templates = self.templates.write().await;
            match templates.get_mut(&scope.user_id) {
                Some(owned) => {
                    let before = owned.len();
                    owned.retain(|t| t.id != id);
                    owned.len() < before
                }
                None => false,
            }
        };
        if removed {
            self.notify(StoreChange::templates(scope));
        }
        Ok(removed)
    }

    fn subscribe_templates(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}
