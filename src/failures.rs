//! Bounded log of failed tasks

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::DispatchError;
use crate::task::{QueueTarget, TaskId};

/// A task whose body returned an error or panicked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Task ID
    pub task_id: TaskId,
    /// Queue the task was submitted to
    pub queue: QueueTarget,
    /// Error or panic message
    pub error: String,
    /// True if the body panicked rather than returning `Err`
    pub panicked: bool,
    /// Timestamp when the task failed
    pub failed_at: DateTime<Utc>,
}

impl TaskFailure {
    pub fn new(
        task_id: impl Into<TaskId>,
        queue: QueueTarget,
        error: impl Into<String>,
        panicked: bool,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            queue,
            error: error.into(),
            panicked,
            failed_at: Utc::now(),
        }
    }

    /// Convert into the matching `DispatchError::TaskFailure`
    pub fn into_error(self) -> DispatchError {
        DispatchError::TaskFailure {
            task_id: self.task_id,
            message: self.error,
        }
    }
}

/// Failure log shared by the worker pool and the main queue.
///
/// Holds at most `max_size` entries; the oldest entry is evicted first.
/// `total()` keeps counting past evictions.
#[derive(Clone)]
pub struct FailureLog {
    inner: Arc<Mutex<FailureLogInner>>,
    max_size: usize,
}

struct FailureLogInner {
    failures: VecDeque<TaskFailure>,
    total: u64,
}

impl FailureLog {
    /// Create a new failure log with a maximum size
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FailureLogInner {
                failures: VecDeque::new(),
                total: 0,
            })),
            max_size,
        }
    }

    /// Record a failure
    pub fn push(&self, failure: TaskFailure) {
        let mut inner = self.inner.lock();

        if inner.failures.len() >= self.max_size {
            inner.failures.pop_front();
        }

        inner.failures.push_back(failure);
        inner.total += 1;
    }

    /// Pop the oldest failure
    pub fn pop(&self) -> Option<TaskFailure> {
        self.inner.lock().failures.pop_front()
    }

    /// List retained failures, oldest first
    pub fn list(&self) -> Vec<TaskFailure> {
        self.inner.lock().failures.iter().cloned().collect()
    }

    /// Clear retained failures (the running total is kept)
    pub fn clear(&self) {
        self.inner.lock().failures.clear();
    }

    /// Number of retained failures
    pub fn len(&self) -> usize {
        self.inner.lock().failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().failures.is_empty()
    }

    /// Failures recorded since creation, including evicted ones
    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::priorities;

    fn make_failure(id: &str, error: &str) -> TaskFailure {
        TaskFailure::new(id, QueueTarget::Priority(priorities::DEFAULT), error, false)
    }

    #[test]
    fn test_failure_log_new() {
        let log = FailureLog::new(100);
        assert_eq!(log.max_size, 100);
        assert!(log.is_empty());
        assert_eq!(log.total(), 0);
    }

    #[test]
    fn test_failure_log_push_and_pop() {
        let log = FailureLog::new(10);

        log.push(make_failure("t1", "error1"));
        log.push(make_failure("t2", "error2"));
        assert_eq!(log.len(), 2);

        assert_eq!(log.pop().unwrap().task_id, "t1");
        assert_eq!(log.pop().unwrap().task_id, "t2");
        assert!(log.pop().is_none());
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn test_failure_log_max_size() {
        let log = FailureLog::new(3);

        for i in 1..=4 {
            log.push(make_failure(&format!("t{}", i), "error"));
        }

        let list = log.list();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].task_id, "t2"); // t1 was evicted
        assert_eq!(list[2].task_id, "t4");
        assert_eq!(log.total(), 4);
    }

    #[test]
    fn test_failure_log_clear_keeps_total() {
        let log = FailureLog::new(10);
        log.push(make_failure("t1", "error1"));
        log.clear();

        assert!(log.is_empty());
        assert_eq!(log.total(), 1);
    }

    #[test]
    fn test_failure_log_clone_shares_state() {
        let log1 = FailureLog::new(10);
        let log2 = log1.clone();

        log2.push(make_failure("t1", "error1"));
        assert_eq!(log1.len(), 1);
    }

    #[test]
    fn test_task_failure_into_error() {
        let failure = make_failure("t9", "bad input");
        match failure.into_error() {
            DispatchError::TaskFailure { task_id, message } => {
                assert_eq!(task_id, "t9");
                assert_eq!(message, "bad input");
            }
            other => panic!("Expected TaskFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_task_failure_serialization() {
        let failure = TaskFailure::new("t1", QueueTarget::Main, "panic", true);

        let json = serde_json::to_string(&failure).unwrap();
        let parsed: TaskFailure = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.task_id, "t1");
        assert_eq!(parsed.queue, QueueTarget::Main);
        assert!(parsed.panicked);
    }
}
