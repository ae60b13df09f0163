//! # A3S Dispatch
//!
//! An in-process task dispatcher with priority lanes and a cooperative main queue.
//!
//! ## Core (always compiled)
//!
//! - Priority lanes: one FIFO lane per priority, at most one task in flight per lane
//! - Worker pool that grows with the number of live lanes (`round(ln(lanes) + 1)`)
//! - Main queue drained only by the thread that drives it, with an optional wake hook
//! - Contained task failures: errors and panics are logged, never kill a worker
//! - Event system for dispatcher lifecycle notifications
//! - Explicit, idempotent shutdown (also run when the last handle is dropped)
//!
//! ## Feature Flags
//!
//! | Feature | Default | Dependencies | Description |
//! |---------|---------|-------------|-------------|
//! | `metrics` | ✅ | — | `MetricsBackend` trait, `LocalMetrics`, wait/execution histograms |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a3s_dispatch::{priorities, Dispatcher, Result};
//!
//! fn main() -> Result<()> {
//!     let dispatcher = Dispatcher::new()?;
//!     let main = dispatcher.main_queue();
//!     let handle = dispatcher.clone();
//!
//!     dispatcher.queue_for(priorities::DEFAULT).submit(move || {
//!         let sum: u64 = (1..=100).sum();
//!         main.submit(move || {
//!             println!("sum: {}", sum);
//!             handle.shutdown();
//!         })
//!         .ok();
//!     })?;
//!
//!     dispatcher.run_main_loop(|| {});
//!     Ok(())
//! }
//! ```

// Core modules (always compiled)
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod failures;
pub mod lane;
pub mod main_queue;
pub mod task;

mod observe;
mod pool;

// Feature-gated modules
#[cfg(feature = "metrics")]
pub mod metrics;

// Core re-exports
pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder, QueueHandle};
pub use error::{DispatchError, Result};
pub use event::{events, DispatchEvent, EventEmitter, EventPayload, EventStream};
pub use failures::{FailureLog, TaskFailure};
pub use lane::LaneStatus;
pub use main_queue::{DrainReport, WakeCallback};
pub use pool::desired_worker_count;
pub use task::{priorities, Priority, QueueTarget, TaskId};

// Feature-gated re-exports
#[cfg(feature = "metrics")]
pub use metrics::{
    metric_names, DispatchMetrics, HistogramPercentiles, HistogramStats, LocalMetrics,
    MetricsBackend, MetricsSnapshot,
};

use serde::{Deserialize, Serialize};

/// Dispatcher statistics snapshot
///
/// Provides a point-in-time view of lanes, the main queue and the worker pool.
///
/// # Fields
///
/// * `total_pending` - Tasks waiting in priority lanes plus the main queue
/// * `total_in_flight` - Lane tasks currently executing on workers
/// * `main_queue_pending` - Tasks waiting for the next main-queue drain
/// * `live_lanes` - Priority lanes currently holding or running work
/// * `workers` - Worker threads spawned so far
/// * `max_workers` - Upper bound on worker threads
/// * `failed_tasks` - Task failures recorded since creation
/// * `is_shutdown` - Whether shutdown has begun
/// * `lanes` - Per-lane status, highest priority first
///
/// # Example
///
/// ```rust,ignore
/// let stats = dispatcher.stats();
/// println!("{} pending across {} lanes on {} workers",
///     stats.total_pending, stats.live_lanes, stats.workers);
///
/// for lane in &stats.lanes {
///     println!("p{}: {} pending, in flight: {}",
///         lane.priority, lane.pending, lane.in_flight);
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub total_pending: usize,
    pub total_in_flight: usize,
    pub main_queue_pending: usize,
    pub live_lanes: usize,
    pub workers: usize,
    pub max_workers: usize,
    pub failed_tasks: u64,
    pub is_shutdown: bool,
    pub lanes: Vec<LaneStatus>,
}
