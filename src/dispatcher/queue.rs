//! Priority queue of pending dispatch jobs
//!
//! Jobs are ordered by priority (higher first), then by enqueue sequence
//! (earlier first), so equal priorities are served FIFO. Push and pop are
//! O(log n).

use crate::error::DispatchResult;
use futures::future::BoxFuture;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::time::Instant;

/// Type-erased unit of work
///
/// Called once with the admission result: `Ok(())` when the rate limiter
/// granted a slot, otherwise the admission error to hand back to the caller
/// without running the task.
pub(crate) type Job = Box<dyn FnOnce(DispatchResult<()>) -> BoxFuture<'static, ()> + Send>;

pub(crate) struct QueuedTask {
    pub priority: i32,
    pub sequence: u64,
    pub enqueued_at: Instant,
    pub job: Job,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: lower sequence must compare greater
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Pending jobs plus the number of dispatch loops draining them
///
/// Both live under one lock so a loop deciding to exit and an enqueue deciding
/// whether to start a loop cannot miss each other.
#[derive(Default)]
pub(crate) struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_sequence: u64,
    pub running_loops: usize,
}

impl QueueState {
    pub fn push(&mut self, priority: i32, job: Job) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedTask {
            priority,
            sequence,
            enqueued_at: Instant::now(),
            job,
        });
        sequence
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
