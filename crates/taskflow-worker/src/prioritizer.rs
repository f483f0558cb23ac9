//! Poller-side task prioritization: combined priority+status weighted
//! score, ties broken by `created_at` ascending.

use taskflow_shared::task::{Task, TaskPriority, TaskStatus};

/// Status contribution to the poller's combined score. Only the three
/// statuses the source names carry a nonzero weight; a task assigned to
/// a poller stays at `TaskStatus::Assigned` regardless of its
/// `workflow_stage`, which scores 0 on this axis, letting
/// `priority_score` dominate instead.
fn status_score(status: TaskStatus) -> u32 {
    match status {
        TaskStatus::Blocked => 20,
        TaskStatus::Review => 10,
        TaskStatus::Assigned => 0,
        _ => 0,
    }
}

fn combined_score(priority: TaskPriority, status: TaskStatus) -> u32 {
    priority.score() + status_score(status)
}

/// Sorts `tasks` by combined score descending, ties broken by
/// `created_at` ascending (oldest first).
pub fn prioritize(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        let score_a = combined_score(a.priority, a.status);
        let score_b = combined_score(b.priority, b.status);
        score_b.cmp(&score_a).then_with(|| a.created_at.cmp(&b.created_at))
    });
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_shared::task::NewTask;

    fn task_with(priority: TaskPriority, status: TaskStatus) -> Task {
        let mut task = Task::create("T", "D", "u1", NewTask { priority: Some(priority), ..Default::default() });
        task.status = status;
        task
    }

    #[test]
    fn higher_priority_sorts_first() {
        let low = task_with(TaskPriority::Low, TaskStatus::Created);
        let critical = task_with(TaskPriority::Critical, TaskStatus::Created);
        let sorted = prioritize(vec![low.clone(), critical.clone()]);
        assert_eq!(sorted[0].task_id, critical.task_id);
        assert_eq!(sorted[1].task_id, low.task_id);
    }

    #[test]
    fn blocked_status_outranks_same_priority_assigned() {
        let assigned = task_with(TaskPriority::Medium, TaskStatus::Assigned);
        let blocked = task_with(TaskPriority::Medium, TaskStatus::Blocked);
        let sorted = prioritize(vec![assigned.clone(), blocked.clone()]);
        assert_eq!(sorted[0].task_id, blocked.task_id);
    }

    #[test]
    fn ties_break_by_created_at_ascending() {
        let mut first = task_with(TaskPriority::Medium, TaskStatus::Created);
        let mut second = task_with(TaskPriority::Medium, TaskStatus::Created);
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        second.created_at = chrono::Utc::now();
        let sorted = prioritize(vec![second.clone(), first.clone()]);
        assert_eq!(sorted[0].task_id, first.task_id);
        assert_eq!(sorted[1].task_id, second.task_id);
    }
}
