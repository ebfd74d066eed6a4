//! Expiration scheduler: the per-process tick queue holding one deferred
//! expiration per armed chest.
//!
//! Entries are ordered by `(due_tick, handle)` so chests due on the same tick
//! fire in the order they were armed. Cancellation is lazy: a cancelled
//! handle is dropped from the pending set and skipped when its entry surfaces.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

use contracts::ChestId;

/// Handle of one armed expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// An expiration that came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledExpiry {
    pub due_tick: u64,
    pub handle: TaskHandle,
    pub chest_id: ChestId,
}

// ---------------------------------------------------------------------------
// Ordering for ScheduledExpiry in the BinaryHeap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Eq, PartialEq)]
struct OrderedExpiry(ScheduledExpiry);

impl PartialOrd for OrderedExpiry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedExpiry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .due_tick
            .cmp(&other.0.due_tick)
            .then_with(|| self.0.handle.cmp(&other.0.handle))
    }
}

// ---------------------------------------------------------------------------
// ExpirationScheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExpirationScheduler {
    queue: BinaryHeap<Reverse<OrderedExpiry>>,
    /// Handles that are armed and neither fired nor cancelled.
    pending: BTreeMap<TaskHandle, ChestId>,
    current_tick: u64,
    next_handle: u64,
}

impl ExpirationScheduler {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            pending: BTreeMap::new(),
            current_tick: 0,
            next_handle: 1,
        }
    }

    /// Arm an expiration `delay_ticks` from now. A zero delay is treated as one tick.
    pub fn schedule(&mut self, chest_id: ChestId, delay_ticks: u64) -> TaskHandle {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;

        let due_tick = self.current_tick.saturating_add(delay_ticks.max(1));
        self.pending.insert(handle, chest_id);
        self.queue.push(Reverse(OrderedExpiry(ScheduledExpiry {
            due_tick,
            handle,
            chest_id,
        })));
        log::trace!("[Scheduler] armed {handle} for chest {chest_id} at tick {due_tick}");
        handle
    }

    /// Cancel an armed expiration. Returns `false` when the handle already
    /// fired, was cancelled before, or never existed.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let cancelled = self.pending.remove(&handle).is_some();
        if cancelled {
            log::trace!("[Scheduler] cancelled {handle}");
        }
        cancelled
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.pending.contains_key(&handle)
    }

    /// Advance the clock and return every expiration that came due, in firing order.
    pub fn advance(&mut self, ticks: u64) -> Vec<ScheduledExpiry> {
        let target = self.current_tick.saturating_add(ticks);
        let mut due = Vec::new();

        while let Some(next) = self.queue.peek() {
            if next.0 .0.due_tick > target {
                break;
            }
            let Some(Reverse(OrderedExpiry(entry))) = self.queue.pop() else {
                break;
            };
            // Cancelled entries are no longer pending.
            if self.pending.remove(&entry.handle).is_some() {
                due.push(entry);
            }
        }

        self.current_tick = target;
        due
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Due tick of the next live entry, if any.
    pub fn peek_next_tick(&self) -> Option<u64> {
        self.queue
            .iter()
            .filter(|entry| self.pending.contains_key(&entry.0 .0.handle))
            .map(|entry| entry.0 .0.due_tick)
            .min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ExpirationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
