//! Tasks, priorities and queue targets

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Task identifier
pub type TaskId = String;

/// Task priority (higher number = higher priority)
pub type Priority = i64;

/// Named priority levels
pub mod priorities {
    use super::Priority;

    pub const HIGH: Priority = 2;
    pub const DEFAULT: Priority = 0;
    pub const LOW: Priority = -2;
    pub const BACKGROUND: Priority = i16::MIN as Priority;
}

/// Body of a task as stored by the queues
pub(crate) type TaskBody = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Where a task was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTarget {
    /// The cooperative main queue
    Main,
    /// A priority lane
    Priority(Priority),
}

impl QueueTarget {
    /// Short label used for metric names and logs
    pub fn label(&self) -> String {
        match self {
            QueueTarget::Main => "main".to_string(),
            QueueTarget::Priority(p) => format!("p{}", p),
        }
    }
}

impl fmt::Display for QueueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueTarget::Main => write!(f, "main"),
            QueueTarget::Priority(p) => write!(f, "priority {}", p),
        }
    }
}

/// A unit of work: a callable plus its priority and enqueue time.
///
/// Immutable once constructed. Owned by the queue holding it until it is
/// dequeued, then by the thread executing it.
pub(crate) struct Task {
    id: TaskId,
    priority: Priority,
    body: TaskBody,
    enqueued_at: Instant,
}

impl Task {
    /// Create a task from an infallible closure
    pub(crate) fn new(priority: Priority, body: impl FnOnce() + Send + 'static) -> Self {
        Self::fallible(priority, move || {
            body();
            Ok(())
        })
    }

    /// Create a task whose body may return an error
    pub(crate) fn fallible(
        priority: Priority,
        body: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            priority,
            body: Box::new(body),
            enqueued_at: Instant::now(),
        }
    }

    /// Get task ID
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Get task priority
    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    /// Monotonic time at which the task was created
    pub(crate) fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Time spent since enqueue
    pub(crate) fn wait_time(&self) -> Duration {
        self.enqueued_at().elapsed()
    }

    /// Run the body, containing both `Err` results and panics.
    pub(crate) fn run(self) -> TaskOutcome {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(self.body));
        let elapsed = started.elapsed();
        match result {
            Ok(Ok(())) => TaskOutcome::Completed { elapsed },
            Ok(Err(err)) => TaskOutcome::Failed {
                elapsed,
                error: format!("{:#}", err),
            },
            Err(payload) => TaskOutcome::Panicked {
                elapsed,
                message: panic_message(payload.as_ref()),
            },
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Result of running a task body
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TaskOutcome {
    Completed { elapsed: Duration },
    Failed { elapsed: Duration, error: String },
    Panicked { elapsed: Duration, message: String },
}

impl TaskOutcome {
    pub(crate) fn elapsed(&self) -> Duration {
        match self {
            TaskOutcome::Completed { elapsed }
            | TaskOutcome::Failed { elapsed, .. }
            | TaskOutcome::Panicked { elapsed, .. } => *elapsed,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
