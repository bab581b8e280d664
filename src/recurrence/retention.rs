//! Retention filter — tasks dated before today drop out of the working set.

use chrono::NaiveDate;

use crate::tasks::model::TaskItem;

/// Keep exactly the tasks dated `today` or later (plain calendar comparison).
pub fn retain_current(tasks: Vec<TaskItem>, today: NaiveDate) -> Vec<TaskItem> {
    tasks.into_iter().filter(|t| t.date >= today).collect()
}

/// Number of tasks that [`retain_current`] would drop.
pub fn count_expired(tasks: &[TaskItem], today: NaiveDate) -> usize {
    tasks.iter().filter(|t| t.date < today).count()
}
