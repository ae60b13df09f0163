//! Priority lanes and the lane registry
//!
//! A lane holds every pending task of one priority level and allows at most
//! one of them in flight at a time. The registry maps priorities to lanes,
//! creating them on first submission and dropping them once drained. It has
//! no lock of its own: the worker pool keeps it inside its mutex so lane
//! mutations and the wake condition share one critical section.

use crate::task::{Priority, Task};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Lane status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneStatus {
    pub priority: Priority,
    pub pending: usize,
    pub in_flight: bool,
}

/// FIFO of tasks at one priority level
pub(crate) struct PriorityLane {
    priority: Priority,
    pending: VecDeque<Task>,
    in_flight: bool,
}

impl PriorityLane {
    fn new(priority: Priority) -> Self {
        Self {
            priority,
            pending: VecDeque::new(),
            in_flight: false,
        }
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn submit(&mut self, task: Task) {
        self.pending.push_back(task);
    }

    /// Take the front task iff nothing from this lane is in flight
    pub(crate) fn try_take(&mut self) -> Option<Task> {
        if !self.is_eligible() {
            return None;
        }
        let task = self.pending.pop_front()?;
        self.in_flight = true;
        Some(task)
    }

    /// Mark the in-flight task finished. Returns true if the lane is now drained.
    pub(crate) fn complete(&mut self) -> bool {
        self.in_flight = false;
        self.is_drained()
    }

    /// Remove a task that has not started yet
    pub(crate) fn remove(&mut self, task_id: &str) -> Option<Task> {
        let position = self.pending.iter().position(|task| task.id() == task_id)?;
        self.pending.remove(position)
    }

    pub(crate) fn is_eligible(&self) -> bool {
        !self.in_flight && !self.pending.is_empty()
    }

    pub(crate) fn is_drained(&self) -> bool {
        !self.in_flight && self.pending.is_empty()
    }

    pub(crate) fn status(&self) -> LaneStatus {
        LaneStatus {
            priority: self.priority(),
            pending: self.pending.len(),
            in_flight: self.in_flight,
        }
    }
}

/// Outcome of marking a lane's in-flight task complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaneCompletion {
    /// More tasks are waiting in the lane
    Pending,
    /// Lane drained and removed from the registry
    Reclaimed,
    /// No such lane (already cleared by shutdown)
    Missing,
}

/// Mapping of priority to lane
#[derive(Default)]
pub(crate) struct LaneRegistry {
    lanes: BTreeMap<Priority, PriorityLane>,
}

impl LaneRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the lane for `priority`, creating it if needed.
    /// The flag is true when the lane was created by this call.
    pub(crate) fn get_or_create_lane(&mut self, priority: Priority) -> (&mut PriorityLane, bool) {
        let created = !self.lanes.contains_key(&priority);
        let lane = self
            .lanes
            .entry(priority)
            .or_insert_with(|| PriorityLane::new(priority));
        (lane, created)
    }

    /// Highest-priority lane that is idle and has pending work
    pub(crate) fn find_eligible_lane(&mut self) -> Option<&mut PriorityLane> {
        self.lanes
            .values_mut()
            .rev()
            .find(|lane| lane.is_eligible())
    }

    /// Select the next task to run and mark its lane in flight
    pub(crate) fn take_next(&mut self) -> Option<Task> {
        self.find_eligible_lane()?.try_take()
    }

    /// Mark the in-flight task of `priority` finished, reclaiming the lane if drained
    pub(crate) fn complete(&mut self, priority: Priority) -> LaneCompletion {
        match self.lanes.get_mut(&priority) {
            Some(lane) => {
                if lane.complete() {
                    self.reclaim_if_drained(priority);
                    LaneCompletion::Reclaimed
                } else {
                    LaneCompletion::Pending
                }
            }
            None => LaneCompletion::Missing,
        }
    }

    /// Remove an unstarted task from its lane, reclaiming the lane if that drains it
    pub(crate) fn remove_task(&mut self, priority: Priority, task_id: &str) -> Option<Task> {
        let task = self.lanes.get_mut(&priority)?.remove(task_id)?;
        self.reclaim_if_drained(priority);
        Some(task)
    }

    /// Remove the lane if it is idle and empty. Returns true if removed.
    pub(crate) fn reclaim_if_drained(&mut self, priority: Priority) -> bool {
        let drained = self
            .lanes
            .get(&priority)
            .map(PriorityLane::is_drained)
            .unwrap_or(false);
        if drained {
            self.lanes.remove(&priority);
        }
        drained
    }

    pub(crate) fn live_lanes(&self) -> usize {
        self.lanes.len()
    }

    pub(crate) fn pending_total(&self) -> usize {
        self.lanes.values().map(|lane| lane.pending.len()).sum()
    }

    pub(crate) fn in_flight_total(&self) -> usize {
        self.lanes.values().filter(|lane| lane.in_flight).count()
    }

    pub(crate) fn has_eligible(&self) -> bool {
        self.lanes.values().any(PriorityLane::is_eligible)
    }

    /// Lane status, highest priority first
    pub(crate) fn status(&self) -> Vec<LaneStatus> {
        self.lanes.values().rev().map(PriorityLane::status).collect()
    }

    /// Drop every lane and its pending tasks. Returns the number of tasks dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.pending_total();
        self.lanes.clear();
        dropped
    }
}
