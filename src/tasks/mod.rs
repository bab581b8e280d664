//! Tasks and recurring templates: data model and the live WebSocket/REST surface.

pub mod model;
pub mod ws;

pub use model::{
    NewTask, NewTemplate, Priority, RecurringTemplate, TaskAction, TaskDraft, TaskItem, TaskPatch,
    TaskWsMessage, TemplatePatch,
};
pub use ws::{PlannerState, planner_routes};
