//! Main queue drained cooperatively by the caller's own thread
//!
//! Tasks submitted here are never picked up by pool workers. They run only
//! inside [`MainQueue::drain_once`], on whichever thread calls it, in the
//! order captured when the drain started.

use crate::error::{DispatchError, Result};
use crate::failures::TaskFailure;
use crate::observe::Observer;
use crate::task::{QueueTarget, Task};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hook invoked after every main-queue submission
pub type WakeCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Result of one main-queue drain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Tasks whose body ran (successfully or not)
    pub executed: usize,
    /// Tasks whose body returned an error or panicked
    pub failed: usize,
    /// Captured tasks not run because the dispatcher stopped mid-drain
    pub skipped: usize,
    /// Failures in execution order
    pub failures: Vec<TaskFailure>,
}

impl DrainReport {
    /// True if nothing was captured by the drain
    pub fn is_empty(&self) -> bool {
        self.executed == 0 && self.skipped == 0
    }

    /// Number of tasks that ran without error
    pub fn succeeded(&self) -> usize {
        self.executed - self.failed
    }

    /// `Ok(executed)` or the first failure as `DispatchError::TaskFailure`
    pub fn into_result(self) -> Result<usize> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(self.executed),
        }
    }
}

pub(crate) struct MainQueue {
    pending: Mutex<VecDeque<Task>>,
    on_enqueue: RwLock<Option<WakeCallback>>,
    stopped: Arc<AtomicBool>,
    observer: Observer,
}

impl MainQueue {
    pub(crate) fn new(stopped: Arc<AtomicBool>, observer: Observer) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            on_enqueue: RwLock::new(None),
            stopped,
            observer,
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Append a task, then notify the wake callback outside the lock
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        if self.is_stopped() {
            return Err(DispatchError::Shutdown);
        }
        self.observer.task_submitted(QueueTarget::Main, task.id());
        self.pending.lock().push_back(task);

        let callback = self.on_enqueue.read().clone();
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    pub(crate) fn set_wake_callback(&self, callback: Option<WakeCallback>) {
        *self.on_enqueue.write() = callback;
    }

    pub(crate) fn has_wake_callback(&self) -> bool {
        self.on_enqueue.read().is_some()
    }

    /// Run every task queued at the moment of the call on the current thread
    pub(crate) fn drain_once(&self) -> DrainReport {
        let batch = std::mem::take(&mut *self.pending.lock());
        let mut report = DrainReport::default();

        let mut batch = batch.into_iter();
        for task in batch.by_ref() {
            if self.is_stopped() {
                report.skipped += 1;
                break;
            }
            let task_id = task.id().to_string();
            self.observer.task_started(QueueTarget::Main, &task);
            let outcome = task.run();
            report.executed += 1;

            if let Some(failure) = self.observer.task_finished(QueueTarget::Main, &task_id, outcome)
            {
                report.failed += 1;
                report.failures.push(failure);
            }
        }
        report.skipped += batch.count();

        self.observer
            .main_queue_drained(report.executed, report.failed, report.skipped);
        report
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending task. Returns the number dropped.
    pub(crate) fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        dropped
    }
}
