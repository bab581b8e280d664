//! Task data model — instances, recurring templates, drafts, patches, and
//! WebSocket message types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How urgent a task is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    #[serde(alias = "baixa")]
    Low,
    #[serde(alias = "media")]
    Medium,
    #[serde(alias = "alta")]
    High,
}

impl Priority {
    /// The string stored in the DB priority column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Parse a stored label, falling back to `Low` for anything unknown or missing.
    pub fn from_db(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some("medium") | Some("media") => Priority::Medium,
            Some("high") | Some("alta") => Priority::High,
            _ => Priority::Low,
        }
    }
}

/// A single dated to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Opaque store-assigned id.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    /// Completion flag.
    #[serde(default)]
    pub done: bool,
    /// Calendar day the task belongs to.
    pub date: NaiveDate,
    /// Template this instance was materialized from; `None` for manual tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// A task instance that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub done: bool,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl NewTask {
    /// A manual, not-yet-done task.
    pub fn new(title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: Priority::Low,
            done: false,
            date,
            template_id: None,
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: link to the template it was materialized from.
    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    /// Attach a store-assigned id.
    pub fn into_item(self, id: impl Into<String>) -> TaskItem {
        TaskItem {
            id: id.into(),
            title: self.title,
            description: self.description,
            priority: self.priority,
            done: self.done,
            date: self.date,
            template_id: self.template_id,
        }
    }
}

/// Partial update of a task. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.done.is_none()
            && self.date.is_none()
    }

    /// Reject empty titles and dates before `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<(), ValidationError> {
        if let Some(title) = &self.title
            && title.trim().is_empty()
        {
            return Err(ValidationError::EmptyTitle);
        }
        if let Some(date) = self.date
            && date < today
        {
            return Err(ValidationError::PastDate { date, today });
        }
        Ok(())
    }

    pub fn apply(&self, task: &mut TaskItem) {
        if let Some(t) = &self.title {
            task.title = t.clone();
        }
        if let Some(d) = &self.description {
            task.description = d.clone();
        }
        if let Some(p) = self.priority {
            task.priority = p;
        }
        if let Some(done) = self.done {
            task.done = done;
        }
        if let Some(date) = self.date {
            task.date = date;
        }
    }
}

/// User input for a new manual task, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl TaskDraft {
    /// Check the draft against today's date and turn it into a storable task.
    pub fn validate(self, today: NaiveDate) -> Result<NewTask, ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let date = self.date.ok_or(ValidationError::MissingDate)?;
        if date < today {
            return Err(ValidationError::PastDate { date, today });
        }
        Ok(NewTask::new(self.title, date)
            .with_description(self.description)
            .with_priority(self.priority))
    }
}

/// A standing weekly rule that produces one task on every matching weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringTemplate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: u8,
}

/// A template that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    pub weekday: u8,
}

impl NewTemplate {
    pub fn new(title: impl Into<String>, weekday: u8) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: Priority::Low,
            weekday,
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.weekday > 6 {
            return Err(ValidationError::InvalidWeekday(self.weekday));
        }
        Ok(())
    }

    /// Attach a store-assigned id.
    pub fn into_template(self, id: impl Into<String>) -> RecurringTemplate {
        RecurringTemplate {
            id: id.into(),
            title: self.title,
            description: self.description,
            priority: self.priority,
            weekday: self.weekday,
        }
    }
}

/// Partial update of a template. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub weekday: Option<u8>,
}

impl TemplatePatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title
            && title.trim().is_empty()
        {
            return Err(ValidationError::EmptyTitle);
        }
        if let Some(weekday) = self.weekday
            && weekday > 6
        {
            return Err(ValidationError::InvalidWeekday(weekday));
        }
        Ok(())
    }

    /// Whether the patch touches a field that is copied onto materialized tasks.
    pub fn touches_task_fields(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.priority.is_some()
    }

    pub fn apply(&self, template: &mut RecurringTemplate) {
        if let Some(t) = &self.title {
            template.title = t.clone();
        }
        if let Some(d) = &self.description {
            template.description = d.clone();
        }
        if let Some(p) = self.priority {
            template.priority = p;
        }
        if let Some(w) = self.weekday {
            template.weekday = w;
        }
    }
}

/// Actions a client can send over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    /// Create a manual task.
    CreateTask {
        #[serde(flatten)]
        draft: TaskDraft,
    },
    /// Update fields on a task.
    UpdateTask {
        id: String,
        #[serde(flatten)]
        patch: TaskPatch,
    },
    /// Mark a task done or not done.
    SetDone { id: String, done: bool },
    /// Delete a task.
    DeleteTask { id: String },
    /// Create a recurring template.
    CreateTemplate {
        #[serde(flatten)]
        template: NewTemplate,
    },
    /// Update fields on a template.
    UpdateTemplate {
        id: String,
        #[serde(flatten)]
        patch: TemplatePatch,
    },
    /// Delete a template. Its materialized tasks stay.
    DeleteTemplate { id: String },
}

/// Messages sent over the WebSocket (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskWsMessage {
    /// Full state: retained tasks and all templates. Sent on connect and on every change.
    Sync {
        today: NaiveDate,
        tasks: Vec<TaskItem>,
        templates: Vec<RecurringTemplate>,
    },
    /// An action from this client was rejected.
    Error { message: String },
}
