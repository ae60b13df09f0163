//! Dispatcher facade: queue handles, the cooperative main loop and shutdown

use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::event::{DispatchEvent, EventEmitter, EventStream};
use crate::failures::FailureLog;
use crate::main_queue::{DrainReport, MainQueue, WakeCallback};
#[cfg(feature = "metrics")]
use crate::metrics::DispatchMetrics;
use crate::observe::Observer;
use crate::pool::{WorkerOptions, WorkerPool};
use crate::task::{priorities, Priority, QueueTarget, Task, TaskId};
use crate::DispatchStats;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

struct Inner {
    config: DispatcherConfig,
    pool: WorkerPool,
    main: MainQueue,
    stopped: Arc<AtomicBool>,
    shutdown_requested: AtomicBool,
    /// Set once the first shutdown call has joined the pool
    shutdown_done: Mutex<bool>,
    shutdown_finished: Condvar,
    observer: Observer,
}

impl Inner {
    fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            self.wait_for_shutdown();
            return;
        }
        self.observer.shutdown_started();
        let (workers_joined, dropped_lane_tasks) = self.pool.shutdown();
        let dropped_main_tasks = self.main.clear();
        self.main.set_wake_callback(None);
        self.observer
            .shutdown_complete(workers_joined, dropped_lane_tasks + dropped_main_tasks);

        *self.shutdown_done.lock() = true;
        self.shutdown_finished.notify_all();
    }

    /// Block until the first shutdown call has finished.
    /// Workers return at once: the first caller may be joining them.
    fn wait_for_shutdown(&self) {
        if self.pool.is_worker_thread() {
            return;
        }
        let mut done = self.shutdown_done.lock();
        while !*done {
            self.shutdown_finished.wait(&mut done);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// In-process task dispatcher.
///
/// Owns one worker pool serving priority lanes and one main queue drained by
/// whichever thread drives [`Dispatcher::run_main_loop`] or
/// [`Dispatcher::process_main_queue_once`]. Cloning is cheap; every clone
/// routes to the same pool and main queue.
///
/// The dispatcher shuts down when [`Dispatcher::shutdown`] is called or when
/// the last clone is dropped. Tasks that capture a clone keep it alive until
/// they run or are dropped by shutdown.
///
/// # Example
///
/// ```rust,ignore
/// use a3s_dispatch::{priorities, Dispatcher};
///
/// let dispatcher = Dispatcher::new()?;
/// let main = dispatcher.main_queue();
///
/// dispatcher.queue_for(priorities::DEFAULT).submit(move || {
///     let answer = 6 * 7;
///     main.submit(move || println!("answer: {}", answer)).ok();
/// })?;
///
/// dispatcher.process_main_queue_once();
/// dispatcher.shutdown();
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration
    pub fn new() -> Result<Self> {
        DispatcherBuilder::new().build()
    }

    /// Start building a dispatcher
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Handle for the priority lane `priority`.
    ///
    /// The lane itself is created lazily by the first submission.
    pub fn queue_for(&self, priority: Priority) -> QueueHandle {
        QueueHandle {
            target: QueueTarget::Priority(priority),
            dispatcher: self.clone(),
        }
    }

    /// Handle for the main queue
    pub fn main_queue(&self) -> QueueHandle {
        QueueHandle {
            target: QueueTarget::Main,
            dispatcher: self.clone(),
        }
    }

    /// Install or clear the hook called after every main-queue submission.
    ///
    /// The hook runs on the submitting thread with no dispatcher lock held.
    /// It usually just wakes an external event loop so it drains the main
    /// queue; it may submit further tasks.
    pub fn set_main_loop_wake_callback(&self, callback: Option<WakeCallback>) {
        self.inner.main.set_wake_callback(callback);
    }

    /// True if a wake callback is installed
    pub fn has_main_loop_wake_callback(&self) -> bool {
        self.inner.main.has_wake_callback()
    }

    /// Drive the main queue on the calling thread until shutdown.
    ///
    /// Each iteration submits `tick` to the main queue and drains it once.
    /// Returns after [`Dispatcher::shutdown`] is called, typically from a
    /// main-queue task.
    pub fn run_main_loop(&self, tick: impl Fn() + Send + Sync + 'static) {
        let tick = Arc::new(tick);
        tracing::debug!("a3s.dispatch.main: main loop started");
        while !self.is_shutdown() {
            let tick = Arc::clone(&tick);
            if self
                .inner
                .main
                .submit(Task::new(priorities::HIGH, move || (*tick)()))
                .is_err()
            {
                break;
            }
            self.inner.main.drain_once();
        }
        tracing::debug!("a3s.dispatch.main: main loop exited");
    }

    /// Run every task currently in the main queue on the calling thread
    pub fn process_main_queue_once(&self) -> DrainReport {
        self.inner.main.drain_once()
    }

    /// Stop the dispatcher.
    ///
    /// Pending tasks are dropped, running tasks finish, and every worker is
    /// joined (except the calling thread when it is itself a worker).
    /// Subsequent submissions fail with `DispatchError::Shutdown`. A second
    /// call, even a concurrent one, returns only once the first has finished
    /// joining the pool; called from a worker it returns immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// True once shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Snapshot of lanes, queues and workers
    pub fn stats(&self) -> DispatchStats {
        let pool = self.inner.pool.status();
        let main_queue_pending = self.inner.main.len();
        DispatchStats {
            total_pending: pool.pending + main_queue_pending,
            total_in_flight: pool.in_flight,
            main_queue_pending,
            live_lanes: pool.lanes.len(),
            workers: pool.workers,
            max_workers: self.inner.pool.max_workers(),
            failed_tasks: self.inner.observer.failures().total(),
            is_shutdown: self.is_shutdown(),
            lanes: pool.lanes,
        }
    }

    /// Log of recent task failures
    pub fn failures(&self) -> &FailureLog {
        self.inner.observer.failures()
    }

    /// Metrics collector (if configured)
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&DispatchMetrics> {
        self.inner.observer.metrics()
    }

    /// Configuration the dispatcher was built with
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Event emitter carrying lifecycle events
    pub fn events(&self) -> &EventEmitter {
        self.inner.observer.events()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.inner.observer.events().subscribe()
    }

    /// Subscribe to lifecycle events as a `Stream`
    pub fn subscribe_stream(&self) -> EventStream {
        self.inner.observer.events().subscribe_stream()
    }

    /// Subscribe to lifecycle events matching `filter`
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&DispatchEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        self.inner.observer.events().subscribe_filtered(filter)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("is_shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// Submission handle for one queue.
///
/// Two handles for the same target are interchangeable.
#[derive(Clone)]
pub struct QueueHandle {
    target: QueueTarget,
    dispatcher: Dispatcher,
}

impl QueueHandle {
    pub fn target(&self) -> QueueTarget {
        self.target
    }

    /// Lane priority, or `None` for the main queue
    pub fn priority(&self) -> Option<Priority> {
        match self.target {
            QueueTarget::Main => None,
            QueueTarget::Priority(p) => Some(p),
        }
    }

    pub fn is_main(&self) -> bool {
        self.target == QueueTarget::Main
    }

    /// Submit a closure. Returns the new task's ID.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> Result<TaskId> {
        self.enqueue(Task::new(self.task_priority(), f))
    }

    /// Submit a fallible closure; an `Err` is recorded as a task failure
    pub fn try_submit(
        &self,
        f: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) -> Result<TaskId> {
        self.enqueue(Task::fallible(self.task_priority(), f))
    }

    /// Submit a closure and receive its return value on a oneshot channel.
    ///
    /// The receiver can be awaited or read with `blocking_recv`. It reports
    /// a closed channel if the body panics or the task is dropped by shutdown.
    pub fn submit_with_result<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Result<oneshot::Receiver<T>> {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            let _ = tx.send(f());
        })?;
        Ok(rx)
    }

    fn task_priority(&self) -> Priority {
        self.priority().unwrap_or(priorities::HIGH)
    }

    fn enqueue(&self, task: Task) -> Result<TaskId> {
        let task_id = task.id().to_string();
        let inner = &self.dispatcher.inner;
        match self.target {
            QueueTarget::Main => inner.main.submit(task)?,
            QueueTarget::Priority(_) => inner.pool.submit(task)?,
        }
        Ok(task_id)
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<DispatchMetrics>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap the number of worker threads
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = Some(max_workers);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.config.stack_size = Some(stack_size);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn with_failure_log_size(mut self, size: usize) -> Self {
        self.config.failure_log_size = size;
        self
    }

    /// Add metrics collection
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the dispatcher.
    ///
    /// No worker is started until the first priority-lane submission.
    pub fn build(self) -> Result<Dispatcher> {
        self.config.validate()?;

        let observer = Observer::new(
            EventEmitter::new(self.config.event_capacity),
            FailureLog::new(self.config.failure_log_size),
        );
        #[cfg(feature = "metrics")]
        let observer = observer.with_metrics(self.metrics);

        let stopped = Arc::new(AtomicBool::new(false));
        let options = WorkerOptions {
            max_workers: self.config.effective_max_workers(),
            thread_name_prefix: self.config.thread_name_prefix.clone(),
            stack_size: self.config.stack_size,
        };
        tracing::info!(
            max_workers = options.max_workers,
            thread_name_prefix = %options.thread_name_prefix,
            "a3s.dispatch.init: dispatcher created"
        );

        let pool = WorkerPool::new(options, Arc::clone(&stopped), observer.clone());
        let main = MainQueue::new(Arc::clone(&stopped), observer.clone());

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                config: self.config,
                pool,
                main,
                stopped,
                shutdown_requested: AtomicBool::new(false),
                shutdown_done: Mutex::new(false),
                shutdown_finished: Condvar::new(),
                observer,
            }),
        })
    }
}
