//! TaskQueue (C7): a durable priority queue over the `tasks` rows living in
//! the Catalog database, implementing the state machine
//!
//! ```text
//!  pending ──take──▶ running ──ok──▶ succeeded
//!     ▲               │ err
//!     │               ▼
//!     └─ retry ◀── failed ──give-up──▶ failed(terminal)
//!                        │
//!                        └── cancel ──▶ cancelled
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::constants::{DEFAULT_MAX_RETRY_COUNT, RETRY_BASE_DELAY_MS};
use crate::error::StorageError;
use crate::model::{Task, TaskKind, TaskStatus};
use crate::retry::RetryStrategy;

/// Rows live in the same Catalog database as `File`/`Segment` (one durable
/// store, not two), so the handle is shared with whatever else in the
/// process needs Catalog access rather than owned outright.
pub struct TaskQueue {
    catalog: Arc<Mutex<Catalog>>,
    max_retry_count: u32,
}

impl TaskQueue {
    pub fn new(catalog: Arc<Mutex<Catalog>>) -> Self {
        Self {
            catalog,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
        }
    }

    pub fn with_max_retries(catalog: Arc<Mutex<Catalog>>, max_retry_count: u32) -> Self {
        Self {
            catalog,
            max_retry_count,
        }
    }

    /// Deduplicates by `(kind,target)` when an equivalent task is already
    /// `pending` or `running`; on duplicate, raises the existing task's
    /// priority to `max(existing, new)` and returns the existing id.
    pub fn enqueue(
        &self,
        kind: TaskKind,
        target: &str,
        priority: i32,
        depends_on: Vec<Uuid>,
    ) -> Result<Uuid, StorageError> {
        let catalog = self.catalog.lock().unwrap();

        if let Some(existing) = catalog.find_pending_duplicate(kind, target)? {
            if priority > existing.priority {
                let bumped = Task {
                    priority,
                    updated_at: Utc::now(),
                    ..existing.clone()
                };
                catalog.upsert_task(&bumped)?;
            }
            return Ok(existing.task_id);
        }

        let now = Utc::now();
        let task = Task {
            task_id: Uuid::new_v4(),
            kind,
            target: target.to_string(),
            priority,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            depends_on,
            created_at: now,
            updated_at: now,
        };
        catalog.upsert_task(&task)?;
        Ok(task.task_id)
    }

    /// Picks the lowest-priority pending task whose dependencies are all
    /// terminal, marking it `running`. Returns `None` if nothing is ready.
    pub fn take(&self) -> Result<Option<Task>, StorageError> {
        self.catalog.lock().unwrap().take_next_pending()
    }

    /// Transitions a task to a terminal or retryable state. On `failed` with
    /// `attempts < max_retry_count`, schedules a re-`pending` immediately —
    /// the caller's worker loop is expected to honor `retry_not_before`
    /// before picking the task back up, applying `base * 2^attempts` backoff.
    pub fn complete(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let catalog = self.catalog.lock().unwrap();
        let Some(mut task) = catalog.get_task(task_id)? else {
            return Ok(());
        };

        match outcome {
            TaskOutcome::Succeeded => {
                task.status = TaskStatus::Succeeded;
                task.last_error = None;
            }
            TaskOutcome::Cancelled => {
                task.status = TaskStatus::Cancelled;
            }
            TaskOutcome::Failed => {
                task.attempts += 1;
                task.last_error = error;
                if task.attempts < self.max_retry_count {
                    task.status = TaskStatus::Pending;
                } else {
                    task.status = TaskStatus::Failed;
                }
            }
        }
        task.updated_at = Utc::now();
        catalog.upsert_task(&task)
    }

    /// If `running`, this only records intent — cooperative workers observe
    /// it via `get_task` and stop at the next batch boundary. If `pending`,
    /// marks `cancelled` immediately.
    pub fn cancel(&self, task_id: Uuid) -> Result<(), StorageError> {
        let catalog = self.catalog.lock().unwrap();
        let Some(mut task) = catalog.get_task(task_id)? else {
            return Ok(());
        };
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Cancelled;
            task.updated_at = Utc::now();
            catalog.upsert_task(&task)?;
        }
        Ok(())
    }

    pub fn list(
        &self,
        status: Option<TaskStatus>,
        kind: Option<TaskKind>,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError> {
        self.catalog.lock().unwrap().list_tasks(status, kind, limit)
    }

    pub fn get(&self, task_id: Uuid) -> Result<Option<Task>, StorageError> {
        self.catalog.lock().unwrap().get_task(task_id)
    }
}

/// Terminal-or-retryable result a worker reports back to `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Exponential backoff delay before a failed task may be retried, capped to
/// avoid unbounded waits on a task that keeps failing. Delegates to the
/// general-purpose retry strategy rather than re-deriving the doubling/cap
/// arithmetic here.
pub fn backoff_delay_ms(attempts: u32) -> u64 {
    const CAP_MS: u64 = 60_000;
    let strategy = RetryStrategy::new(
        u32::MAX,
        Duration::from_millis(RETRY_BASE_DELAY_MS),
        2.0,
        Duration::from_millis(CAP_MS),
    );
    strategy.delay_for(attempts.saturating_add(1)).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn queue() -> TaskQueue {
        TaskQueue::new(Arc::new(Mutex::new(Catalog::in_memory().unwrap())))
    }

    #[test]
    fn enqueue_dedups_pending_by_kind_and_target() {
        let q = queue();
        let id1 = q.enqueue(TaskKind::IngestFile, "/tmp/a", 5, vec![]).unwrap();
        let id2 = q.enqueue(TaskKind::IngestFile, "/tmp/a", 9, vec![]).unwrap();
        assert_eq!(id1, id2);

        let task = q.get(id1).unwrap().unwrap();
        assert_eq!(task.priority, 9);
    }

    #[test]
    fn take_returns_none_when_empty() {
        let q = queue();
        assert!(q.take().unwrap().is_none());
    }

    #[test]
    fn take_marks_task_running_and_complete_marks_succeeded() {
        let q = queue();
        let id = q.enqueue(TaskKind::IngestFile, "/tmp/a", 1, vec![]).unwrap();

        let taken = q.take().unwrap().unwrap();
        assert_eq!(taken.task_id, id);
        assert_eq!(taken.status, TaskStatus::Running);

        q.complete(id, TaskOutcome::Succeeded, None).unwrap();
        let task = q.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
    }

    #[test]
    fn failed_task_retries_until_max_attempts_then_terminal() {
        let q = TaskQueue::with_max_retries(Arc::new(Mutex::new(Catalog::in_memory().unwrap())), 2);
        let id = q.enqueue(TaskKind::IngestFile, "/tmp/a", 1, vec![]).unwrap();

        q.take().unwrap();
        q.complete(id, TaskOutcome::Failed, Some("boom".into())).unwrap();
        assert_eq!(q.get(id).unwrap().unwrap().status, TaskStatus::Pending);

        q.take().unwrap();
        q.complete(id, TaskOutcome::Failed, Some("boom again".into())).unwrap();
        assert_eq!(q.get(id).unwrap().unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn cancel_pending_task_is_immediate() {
        let q = queue();
        let id = q.enqueue(TaskKind::IngestFile, "/tmp/a", 1, vec![]).unwrap();
        q.cancel(id).unwrap();
        assert_eq!(q.get(id).unwrap().unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(0), RETRY_BASE_DELAY_MS);
        assert_eq!(backoff_delay_ms(1), RETRY_BASE_DELAY_MS * 2);
        assert!(backoff_delay_ms(20) <= 60_000);
    }

    #[test]
    fn dependent_task_waits_for_dependency_to_terminate() {
        let q = queue();
        let dep = q.enqueue(TaskKind::IngestFile, "/tmp/a", 5, vec![]).unwrap();
        let _child = q
            .enqueue(TaskKind::Reindex, "/tmp/a", 1, vec![dep])
            .unwrap();

        // Dependency still pending, so the lowest-priority child cannot be taken yet.
        let taken = q.take().unwrap().unwrap();
        assert_eq!(taken.task_id, dep);
    }
}
