//! Operation queue and coalescer — the heart of the system.

mod coalescer;
mod scheduler;

pub use coalescer::{coalesce, PendingKind, PendingOp, PendingOutcome, Sink};
pub use scheduler::{QueueConfig, Scheduler};

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

/// The shared mutable queue state. Protected by a mutex that is never held
/// across database I/O; the writer thread is the sole consumer of drained
/// batches.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    /// Soft backpressure limit (§5): the queue stays unbounded, but a push
    /// past this depth logs a warning so an operator notices the writer
    /// thread is falling behind rather than silently growing memory.
    max_queue_depth: Option<usize>,
}

struct QueueState {
    pending: VecDeque<PendingOp>,
    oldest_enqueued_at: Option<Instant>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::with_soft_limit(None)
    }

    pub fn with_soft_limit(max_queue_depth: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                oldest_enqueued_at: None,
            }),
            max_queue_depth,
        }
    }

    /// Non-blocking: pushes the op and returns immediately.
    pub fn push(&self, op: PendingOp) -> usize {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            state.oldest_enqueued_at = Some(Instant::now());
        }
        state.pending.push_back(op);
        let len = state.pending.len();
        drop(state);
        if let Some(limit) = self.max_queue_depth {
            if len > limit {
                tracing::warn!(
                    queue_len = len,
                    max_queue_depth = limit,
                    "operation queue past its soft depth limit; writer thread may be falling behind"
                );
            }
        }
        len
    }

    /// Atomically empties the queue, returning everything that was pending.
    pub fn drain(&self) -> Vec<PendingOp> {
        let mut state = self.state.lock();
        state.oldest_enqueued_at = None;
        state.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The instant by which a drain must happen to respect the idle
    /// interval, if anything is queued.
    pub fn idle_deadline(&self, idle_interval: std::time::Duration) -> Option<Instant> {
        self.state
            .lock()
            .oldest_enqueued_at
            .map(|t| t + idle_interval)
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}
