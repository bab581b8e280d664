//! Persistence layer — task and template stores with change feeds.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{StoreChange, TaskStore, TemplateStore, live_tasks, live_templates};
