//! Recurrence engine — decides which template instances are missing for today.
//!
//! Pure: no store access, no clock access, no randomness. The caller supplies
//! today's date and the weekday derived from it.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::tasks::model::{NewTask, RecurringTemplate, TaskItem};

/// Creation requests for every template due on `today_weekday` that has no
/// instance among `existing_today`.
///
/// `existing_today` should hold only tasks dated `today`; tasks without a template
/// reference are ignored. A template id listed twice yields one request.
pub fn compute_missing_instances(
    templates: &[RecurringTemplate],
    existing_today: &[TaskItem],
    today: NaiveDate,
    today_weekday: u8,
) -> Vec<NewTask> {
    let mut materialized: HashSet<&str> = existing_today
        .iter()
        .filter_map(|t| t.template_id.as_deref())
        .collect();

    let mut requests = Vec::new();
    for template in templates {
        if template.weekday != today_weekday {
            continue;
        }
        // insert() doubles as the duplicate-id guard
        if !materialized.insert(template.id.as_str()) {
            continue;
        }
        requests.push(
            NewTask::new(template.title.clone(), today)
                .with_description(template.description.clone())
                .with_priority(template.priority)
                .with_template(template.id.clone()),
        );
    }
    requests
}
