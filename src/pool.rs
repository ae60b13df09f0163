//! Worker pool executing priority-lane tasks
//!
//! Workers share one mutex holding the lane registry and one condition
//! variable signalling that work may be available. A worker scans for the
//! highest-priority idle lane, runs the front task outside the lock, then
//! marks the lane idle again before reporting how the task ended.
//!
//! The pool only grows: every submission that creates a lane recomputes the
//! desired worker count from the number of live lanes and spawns the
//! difference. Stale workers just wait.

use crate::error::{DispatchError, Result};
use crate::lane::{LaneCompletion, LaneRegistry, LaneStatus};
use crate::observe::Observer;
use crate::task::{Priority, QueueTarget, Task};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Worker count wanted for `live_lanes` lanes: `round(ln(lanes) + 1)` within `[1, max_workers]`.
pub fn desired_worker_count(live_lanes: usize, max_workers: usize) -> usize {
    let max_workers = max_workers.max(1);
    if live_lanes == 0 {
        return 1;
    }
    let desired = ((live_lanes as f64).ln() + 1.0).round() as usize;
    desired.clamp(1, max_workers)
}

/// State guarded by the pool mutex
struct PoolState {
    registry: LaneRegistry,
    /// Workers spawned so far (including ones being started)
    spawned: usize,
}

struct Shared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    /// Written only while holding `state`
    stopped: Arc<AtomicBool>,
    observer: Observer,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Pool snapshot used by dispatcher stats
#[derive(Debug, Clone)]
pub(crate) struct PoolStatus {
    pub(crate) lanes: Vec<LaneStatus>,
    pub(crate) pending: usize,
    pub(crate) in_flight: usize,
    pub(crate) workers: usize,
}

/// Worker thread options
#[derive(Debug, Clone)]
pub(crate) struct WorkerOptions {
    pub(crate) max_workers: usize,
    pub(crate) thread_name_prefix: String,
    pub(crate) stack_size: Option<usize>,
}

/// Worker pool
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Every worker thread ever spawned; survives `shutdown` taking the handles
    worker_threads: Mutex<Vec<ThreadId>>,
    options: WorkerOptions,
    #[cfg(test)]
    refuse_spawn: AtomicBool,
}

impl WorkerPool {
    pub(crate) fn new(options: WorkerOptions, stopped: Arc<AtomicBool>, observer: Observer) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    registry: LaneRegistry::new(),
                    spawned: 0,
                }),
                work_available: Condvar::new(),
                stopped,
                observer,
            }),
            workers: Mutex::new(Vec::new()),
            worker_threads: Mutex::new(Vec::new()),
            options,
            #[cfg(test)]
            refuse_spawn: AtomicBool::new(false),
        }
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.options.max_workers
    }

    /// True when called from one of this pool's worker threads
    pub(crate) fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_threads.lock().contains(&current)
    }

    /// Append a task to its priority lane, growing the pool if a lane was created.
    ///
    /// If no worker can be started and none is running, the task is taken
    /// back out of its lane and `DispatchError::WorkerSpawn` is returned, so
    /// a failed submission never runs later.
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        let priority = task.priority();
        let task_id = task.id().to_string();

        let (to_spawn, first_index) = {
            let mut state = self.shared.state.lock();
            if self.shared.is_stopped() {
                return Err(DispatchError::Shutdown);
            }

            let (lane, created) = state.registry.get_or_create_lane(priority);
            lane.submit(task);

            let live_lanes = state.registry.live_lanes();
            let mut to_spawn = 0;
            let first_index = state.spawned;
            if created {
                let desired = desired_worker_count(live_lanes, self.options.max_workers);
                to_spawn = desired.saturating_sub(state.spawned);
                state.spawned += to_spawn;
            }

            // Reported before any worker can pick the task up
            self.shared
                .observer
                .task_submitted(QueueTarget::Priority(priority), &task_id);
            if created {
                self.shared.observer.lane_created(priority, live_lanes);
            }
            (to_spawn, first_index)
        };
        self.shared.work_available.notify_one();

        for index in first_index..first_index + to_spawn {
            if let Err(err) = self.spawn_worker(index) {
                return self.withdraw(priority, &task_id, err);
            }
        }
        Ok(())
    }

    /// Take an unstarted task back out of its lane after a failed spawn.
    /// A worker that already picked it up wins and the submission stands.
    fn withdraw(&self, priority: Priority, task_id: &str, err: DispatchError) -> Result<()> {
        let withdrawn = self
            .shared
            .state
            .lock()
            .registry
            .remove_task(priority, task_id);
        match withdrawn {
            Some(task) => {
                drop(task);
                tracing::warn!(
                    task_id = %task_id,
                    priority = priority,
                    "a3s.dispatch.submit: no worker available, task withdrawn"
                );
                Err(err)
            }
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn spawn_thread(
        &self,
        builder: thread::Builder,
        body: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        builder.spawn(body)
    }

    #[cfg(test)]
    fn spawn_thread(
        &self,
        builder: thread::Builder,
        body: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        if self.refuse_spawn.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "thread limit reached",
            ));
        }
        builder.spawn(body)
    }

    fn spawn_worker(&self, index: usize) -> Result<()> {
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.options.thread_name_prefix, index));
        if let Some(stack_size) = self.options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = Arc::clone(&self.shared);
        match self.spawn_thread(builder, move || run_worker(shared, index)) {
            Ok(handle) => {
                self.worker_threads.lock().push(handle.thread().id());
                let mut workers = self.workers.lock();
                if self.shared.is_stopped() {
                    // `shutdown` may already have taken the handles
                    drop(workers);
                    if handle.join().is_err() {
                        tracing::error!("a3s.dispatch.shutdown: worker thread panicked");
                    }
                    return Ok(());
                }
                workers.push(handle);
                let count = workers.len();
                drop(workers);
                self.shared.observer.worker_spawned(index, count);
                Ok(())
            }
            Err(err) => {
                let remaining = {
                    let mut state = self.shared.state.lock();
                    state.spawned = state.spawned.saturating_sub(1);
                    state.spawned
                };
                tracing::error!(
                    worker = index,
                    error = %err,
                    "a3s.dispatch.pool: failed to spawn worker"
                );
                if remaining == 0 {
                    Err(DispatchError::WorkerSpawn(err.to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            lanes: state.registry.status(),
            pending: state.registry.pending_total(),
            in_flight: state.registry.in_flight_total(),
            workers: self.workers.lock().len(),
        }
    }

    /// Stop every worker and join them.
    ///
    /// Pending tasks are dropped. Returns `(workers_joined, tasks_dropped)`.
    /// When called from one of the pool's own workers that worker is not
    /// joined; it exits as soon as its current task returns.
    pub(crate) fn shutdown(&self) -> (usize, usize) {
        let dropped = {
            let mut state = self.shared.state.lock();
            self.shared.stopped.store(true, Ordering::SeqCst);
            state.registry.clear()
        };
        self.shared.work_available.notify_all();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        let mut joined = 0;
        for handle in handles {
            if handle.thread().id() == current {
                tracing::warn!("a3s.dispatch.shutdown: requested from a worker, not joining it");
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("a3s.dispatch.shutdown: worker thread panicked");
            }
            joined += 1;
        }
        (joined, dropped)
    }
}

fn run_worker(shared: Arc<Shared>, index: usize) {
    tracing::debug!(worker = index, "a3s.dispatch.worker: started");
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if shared.is_stopped() {
                    tracing::debug!(worker = index, "a3s.dispatch.worker: stopped");
                    return;
                }
                if let Some(task) = state.registry.take_next() {
                    break task;
                }
                shared.work_available.wait(&mut state);
            }
        };

        let priority = task.priority();
        let queue = QueueTarget::Priority(priority);
        let task_id = task.id().to_string();
        shared.observer.task_started(queue, &task);
        let outcome = task.run();

        // Release the lane before reporting so a failure never wedges it.
        finish_lane(&shared, priority);
        shared.observer.task_finished(queue, &task_id, outcome);
    }
}

fn finish_lane(shared: &Shared, priority: Priority) {
    let (completion, live_lanes, more_work) = {
        let mut state = shared.state.lock();
        let completion = state.registry.complete(priority);
        (
            completion,
            state.registry.live_lanes(),
            state.registry.has_eligible(),
        )
    };
    if more_work {
        shared.work_available.notify_one();
    }
    if completion == LaneCompletion::Reclaimed {
        shared.observer.lane_reclaimed(priority, live_lanes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{events, EventEmitter};
    use crate::failures::FailureLog;
    use crate::task::priorities;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn make_pool(max_workers: usize) -> WorkerPool {
        make_pool_with_events(max_workers, 16)
    }

    fn make_pool_with_events(max_workers: usize, event_capacity: usize) -> WorkerPool {
        let options = WorkerOptions {
            max_workers,
            thread_name_prefix: "test-worker".to_string(),
            stack_size: None,
        };
        WorkerPool::new(
            options,
            Arc::new(AtomicBool::new(false)),
            Observer::new(EventEmitter::new(event_capacity), FailureLog::new(16)),
        )
    }

    #[test]
    fn test_desired_worker_count_formula() {
        assert_eq!(desired_worker_count(0, 8), 1);
        assert_eq!(desired_worker_count(1, 8), 1); // ln 1 + 1 = 1
        assert_eq!(desired_worker_count(2, 8), 2); // 1.69
        assert_eq!(desired_worker_count(4, 8), 2); // 2.39
        assert_eq!(desired_worker_count(5, 8), 3); // 2.61
        assert_eq!(desired_worker_count(12, 8), 3); // 3.48
        assert_eq!(desired_worker_count(13, 8), 4); // 3.56
        assert_eq!(desired_worker_count(100, 8), 6); // 5.61
    }

    #[test]
    fn test_desired_worker_count_clamped() {
        assert_eq!(desired_worker_count(100, 2), 2);
        assert_eq!(desired_worker_count(100, 1), 1);
        assert_eq!(desired_worker_count(5, 0), 1);
    }

    #[test]
    fn test_pool_starts_without_workers() {
        let pool = make_pool(4);
        let status = pool.status();
        assert_eq!(status.workers, 0);
        assert!(status.lanes.is_empty());
        pool.shutdown();
    }

    #[test]
    fn test_pool_runs_submitted_task() {
        let pool = make_pool(4);
        let (tx, rx) = mpsc::channel();

        pool.submit(Task::new(priorities::DEFAULT, move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-0"));
        pool.shutdown();
    }

    #[test]
    fn test_pool_grows_with_lanes() {
        let pool = make_pool(8);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        // Five distinct lanes, each blocked so none drains early
        for p in 0..5 {
            let release_rx = Arc::clone(&release_rx);
            pool.submit(Task::new(p, move || {
                let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            }))
            .unwrap();
        }

        assert_eq!(pool.status().workers, desired_worker_count(5, 8));

        for _ in 0..5 {
            let _ = release_tx.send(());
        }
        pool.shutdown();
    }

    #[test]
    fn test_pool_never_exceeds_max_workers() {
        let pool = make_pool(2);
        for p in 0..50 {
            pool.submit(Task::new(p, || {})).unwrap();
        }
        assert!(pool.status().workers <= 2);
        pool.shutdown();
    }

    #[test]
    fn test_pool_survives_panicking_task() {
        let pool = make_pool(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        pool.submit(Task::new(priorities::HIGH, || panic!("task blew up")))
            .unwrap();
        let c = Arc::clone(&counter);
        pool.submit(Task::new(priorities::HIGH, move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }))
        .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pool.shared.observer.failures().len(), 1);
        pool.shutdown();
    }

    #[test]
    fn test_pool_reclaims_drained_lanes() {
        let pool = make_pool(2);
        let (tx, rx) = mpsc::channel();

        pool.submit(Task::new(priorities::LOW, move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The lane is released right after the body returns
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !pool.status().lanes.is_empty() {
            assert!(std::time::Instant::now() < deadline, "lane never reclaimed");
            thread::sleep(Duration::from_millis(1));
        }
        pool.shutdown();
    }

    #[test]
    fn test_pool_submit_after_shutdown() {
        let pool = make_pool(2);
        pool.submit(Task::new(priorities::LOW, || {})).unwrap();
        pool.shutdown();

        let result = pool.submit(Task::new(priorities::LOW, || {}));
        assert!(matches!(result, Err(DispatchError::Shutdown)));
    }

    #[test]
    fn test_pool_shutdown_drops_pending() {
        let pool = make_pool(1);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(Task::new(priorities::DEFAULT, move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.submit(Task::new(priorities::DEFAULT, move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        let handle = {
            let release_tx = release_tx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let _ = release_tx.send(());
            })
        };
        let (joined, dropped) = pool.shutdown();
        handle.join().unwrap();

        assert_eq!(joined, 1);
        assert_eq!(dropped, 3);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pool_shutdown_is_idempotent() {
        let pool = make_pool(2);
        pool.submit(Task::new(priorities::LOW, || {})).unwrap();
        pool.shutdown();
        assert_eq!(pool.shutdown(), (0, 0));
    }

    #[test]
    fn test_pool_withdraws_task_when_no_worker_starts() {
        let pool = make_pool(2);
        let ran = Arc::new(AtomicUsize::new(0));
        pool.refuse_spawn.store(true, Ordering::SeqCst);

        let r = Arc::clone(&ran);
        let result = pool.submit(Task::new(priorities::DEFAULT, move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(matches!(result, Err(DispatchError::WorkerSpawn(_))));

        let status = pool.status();
        assert!(status.lanes.is_empty());
        assert_eq!(status.pending, 0);
        assert_eq!(status.workers, 0);

        // A later submission starts a worker; the failed one must not run
        pool.refuse_spawn.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        pool.submit(Task::new(priorities::DEFAULT, move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.status().workers, 1);
        pool.shutdown();
    }

    #[test]
    fn test_pool_keeps_task_when_a_worker_is_running() {
        let pool = make_pool(4);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();
        pool.submit(Task::new(priorities::HIGH, move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
        assert_eq!(pool.status().workers, 1);

        // A second lane wants a second worker; the existing one still serves it
        pool.refuse_spawn.store(true, Ordering::SeqCst);
        pool.submit(Task::new(priorities::LOW, move || tx.send(()).unwrap()))
            .unwrap();
        assert_eq!(pool.status().lanes.len(), 2);

        release_tx.send(()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.status().workers, 1);
        pool.shutdown();
    }

    #[test]
    fn test_pool_joins_worker_spawned_after_shutdown() {
        let pool = make_pool(2);
        assert_eq!(pool.shutdown(), (0, 0));

        pool.spawn_worker(0).unwrap();

        assert!(pool.workers.lock().is_empty());
        assert_eq!(pool.worker_threads.lock().len(), 1);
        assert_eq!(pool.shutdown(), (0, 0));
    }

    #[test]
    fn test_pool_is_worker_thread() {
        let pool = Arc::new(make_pool(1));
        let (tx, rx) = mpsc::channel();
        assert!(!pool.is_worker_thread());

        let inner = Arc::clone(&pool);
        pool.submit(Task::new(priorities::DEFAULT, move || {
            tx.send(inner.is_worker_thread()).unwrap();
        }))
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        pool.shutdown();
        assert!(!pool.is_worker_thread());
    }

    #[test]
    fn test_pool_reports_submission_before_start() {
        let pool = make_pool_with_events(4, 4096);
        let mut rx = pool.shared.observer.events().subscribe();
        let (tx, done) = mpsc::channel();

        for i in 0..200 {
            let tx = tx.clone();
            pool.submit(Task::new(i % 4, move || {
                let _ = tx.send(());
            }))
            .unwrap();
        }
        for _ in 0..200 {
            done.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        pool.shutdown();

        let mut submitted = HashSet::new();
        let mut started = 0;
        while let Ok(event) = rx.try_recv() {
            let task_id = event
                .field("task_id")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if event.key == events::TASK_SUBMITTED {
                submitted.insert(task_id.unwrap());
            } else if event.key == events::TASK_STARTED {
                let task_id = task_id.unwrap();
                assert!(
                    submitted.contains(&task_id),
                    "task {} started before it was reported submitted",
                    task_id
                );
                started += 1;
            }
        }
        assert_eq!(started, 200);
    }
}
