//! Dispatcher configuration types

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// Minimum worker ceiling when hardware parallelism is detected automatically
pub const MIN_AUTO_WORKERS: usize = 2;

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Upper bound on worker threads (None = max(cpu count, 2))
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Worker thread name prefix; threads are named `{prefix}-{index}`
    pub thread_name_prefix: String,
    /// Worker thread stack size in bytes (None = platform default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
    /// Capacity of the lifecycle event broadcast channel
    pub event_capacity: usize,
    /// Number of task failures retained by the failure log
    pub failure_log_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            thread_name_prefix: "a3s-dispatch-worker".to_string(),
            stack_size: None,
            event_capacity: 256,
            failure_log_size: 100,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker ceiling (builder pattern)
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the worker thread name prefix (builder pattern)
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker stack size (builder pattern)
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Set the event channel capacity (builder pattern)
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the failure log size (builder pattern)
    pub fn with_failure_log_size(mut self, size: usize) -> Self {
        self.failure_log_size = size;
        self
    }

    /// Worker ceiling actually applied by the pool
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| num_cpus::get().max(MIN_AUTO_WORKERS))
    }

    /// Check the configuration for values the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(DispatchError::ConfigError(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(DispatchError::ConfigError(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(DispatchError::ConfigError(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.failure_log_size == 0 {
            return Err(DispatchError::ConfigError(
                "failure_log_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
