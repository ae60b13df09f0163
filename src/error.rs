//! Error types for the dispatcher
//!
//! All errors implement `std::error::Error` via `thiserror::Error`.
//!
//! # Error Handling
//!
//! The [`DispatchError`] enum covers:
//! - Submission errors (the dispatcher has been shut down)
//! - Task failures (a body returned `Err` or panicked)
//! - Configuration and worker spawn errors
//!
//! # Example
//!
//! ```rust,ignore
//! use a3s_dispatch::{priorities, DispatchError, Dispatcher};
//!
//! match dispatcher.queue_for(priorities::HIGH).submit(|| work()) {
//!     Ok(task_id) => tracing::debug!(%task_id, "queued"),
//!     Err(DispatchError::Shutdown) => eprintln!("dispatcher is gone"),
//!     Err(e) => eprintln!("unexpected error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Dispatcher error type
///
/// # Variants
///
/// * `Shutdown` - Submission attempted after `shutdown()`
/// * `TaskFailure` - A task body returned an error or panicked
/// * `ConfigError` - Invalid dispatcher configuration
/// * `WorkerSpawn` - The OS refused to start a worker thread
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Dispatcher has been shut down
    #[error("Dispatcher is shut down, not accepting new tasks")]
    Shutdown,

    /// Task execution failure
    #[error("Task {task_id} failed: {message}")]
    TaskFailure { task_id: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// Result type alias using DispatchError
pub type Result<T> = std::result::Result<T, DispatchError>;
