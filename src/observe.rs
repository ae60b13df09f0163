//! Reporting shared by the worker pool and the main queue

use std::collections::HashMap;

use crate::event::{events, DispatchEvent, EventEmitter};
use crate::failures::{FailureLog, TaskFailure};
#[cfg(feature = "metrics")]
use crate::metrics::DispatchMetrics;
use crate::task::{Priority, QueueTarget, Task, TaskOutcome};

/// Fans lifecycle notifications out to tracing, events, the failure log and metrics.
#[derive(Clone)]
pub(crate) struct Observer {
    events: EventEmitter,
    failures: FailureLog,
    #[cfg(feature = "metrics")]
    metrics: Option<DispatchMetrics>,
}

impl Observer {
    pub(crate) fn new(events: EventEmitter, failures: FailureLog) -> Self {
        Self {
            events,
            failures,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn with_metrics(mut self, metrics: Option<DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub(crate) fn failures(&self) -> &FailureLog {
        &self.failures
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn metrics(&self) -> Option<&DispatchMetrics> {
        self.metrics.as_ref()
    }

    fn emit(&self, key: &str, fields: Vec<(&str, serde_json::Value)>) {
        if !self.events.has_subscribers() {
            return;
        }
        let map: HashMap<String, serde_json::Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.events.emit(DispatchEvent::with_map(key, map));
    }

    pub(crate) fn task_submitted(&self, queue: QueueTarget, task_id: &str) {
        tracing::trace!(task_id = %task_id, queue = %queue, "a3s.dispatch.submit: task queued");
        self.emit(
            events::TASK_SUBMITTED,
            vec![
                ("task_id", serde_json::json!(task_id)),
                ("queue", serde_json::json!(queue)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_submit(&queue.label());
        }
    }

    pub(crate) fn task_started(&self, queue: QueueTarget, task: &Task) {
        let wait = task.wait_time();
        tracing::trace!(
            task_id = %task.id(),
            queue = %queue,
            wait_us = wait.as_micros() as u64,
            "a3s.dispatch.execute: task started"
        );
        self.emit(
            events::TASK_STARTED,
            vec![
                ("task_id", serde_json::json!(task.id())),
                ("queue", serde_json::json!(queue)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_wait_time(&queue.label(), wait.as_secs_f64() * 1000.0);
        }
    }

    /// Report how a task body ended. Returns the failure record, if any.
    pub(crate) fn task_finished(
        &self,
        queue: QueueTarget,
        task_id: &str,
        outcome: TaskOutcome,
    ) -> Option<TaskFailure> {
        let elapsed_ms = outcome.elapsed().as_secs_f64() * 1000.0;
        let (error, panicked) = match outcome {
            TaskOutcome::Completed { .. } => {
                self.emit(
                    events::TASK_COMPLETED,
                    vec![
                        ("task_id", serde_json::json!(task_id)),
                        ("queue", serde_json::json!(queue)),
                    ],
                );
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.metrics {
                    metrics.record_complete(&queue.label(), elapsed_ms);
                }
                return None;
            }
            TaskOutcome::Failed { error, .. } => (error, false),
            TaskOutcome::Panicked { message, .. } => (message, true),
        };

        tracing::warn!(
            task_id = %task_id,
            queue = %queue,
            panicked,
            elapsed_ms,
            error = %error,
            "a3s.dispatch.failure: task failed"
        );
        self.emit(
            events::TASK_FAILED,
            vec![
                ("task_id", serde_json::json!(task_id)),
                ("queue", serde_json::json!(queue)),
                ("error", serde_json::json!(error)),
                ("panicked", serde_json::json!(panicked)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(&queue.label());
        }
        let failure = TaskFailure::new(task_id, queue, error, panicked);
        self.failures.push(failure.clone());
        Some(failure)
    }

    pub(crate) fn lane_created(&self, priority: Priority, live_lanes: usize) {
        tracing::debug!(priority, live_lanes, "a3s.dispatch.lane: lane created");
        self.emit(
            events::LANE_CREATED,
            vec![
                ("priority", serde_json::json!(priority)),
                ("live_lanes", serde_json::json!(live_lanes)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.set_live_lanes(live_lanes);
        }
    }

    pub(crate) fn lane_reclaimed(&self, priority: Priority, live_lanes: usize) {
        tracing::debug!(priority, live_lanes, "a3s.dispatch.lane: lane reclaimed");
        self.emit(
            events::LANE_RECLAIMED,
            vec![
                ("priority", serde_json::json!(priority)),
                ("live_lanes", serde_json::json!(live_lanes)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.set_live_lanes(live_lanes);
        }
    }

    pub(crate) fn worker_spawned(&self, index: usize, workers: usize) {
        tracing::debug!(worker = index, workers, "a3s.dispatch.pool: worker spawned");
        self.emit(
            events::WORKER_SPAWNED,
            vec![
                ("worker", serde_json::json!(index)),
                ("workers", serde_json::json!(workers)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.set_workers(workers);
        }
    }

    pub(crate) fn main_queue_drained(&self, executed: usize, failed: usize, skipped: usize) {
        if executed == 0 && skipped == 0 {
            return;
        }
        tracing::trace!(executed, failed, skipped, "a3s.dispatch.main: drained");
        self.emit(
            events::MAIN_QUEUE_DRAINED,
            vec![
                ("executed", serde_json::json!(executed)),
                ("failed", serde_json::json!(failed)),
                ("skipped", serde_json::json!(skipped)),
            ],
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_main_drain();
        }
    }

    pub(crate) fn shutdown_started(&self) {
        tracing::info!("a3s.dispatch.shutdown: stopping dispatcher");
        self.events
            .emit(DispatchEvent::empty(events::SHUTDOWN_STARTED));
    }

    pub(crate) fn shutdown_complete(&self, workers_joined: usize, dropped_tasks: usize) {
        tracing::info!(
            workers_joined,
            dropped_tasks,
            "a3s.dispatch.shutdown: dispatcher stopped"
        );
        self.emit(
            events::SHUTDOWN_COMPLETE,
            vec![
                ("workers_joined", serde_json::json!(workers_joined)),
                ("dropped_tasks", serde_json::json!(dropped_tasks)),
            ],
        );
    }
}
