//! Weekly Planner — recurring weekly tasks with live sync.

pub mod clock;
pub mod config;
pub mod error;
pub mod planner;
pub mod recurrence;
pub mod session;
pub mod store;
pub mod tasks;
