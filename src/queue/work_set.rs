//! # Owner-side task classification.
//!
//! [`WorkSet`] holds the three sub-queues a loop drains: triage (freshly
//! arrived, not yet classified), delayed (ordered by due time), and
//! deferred (non-reentrant tasks postponed by nesting). A task lives in
//! exactly one sub-queue at a time, and moving between them preserves its
//! original sequence number.
//!
//! The sub-queues are a closed set of three concrete types with a uniform
//! interface; the set is fixed by design, so there is no dynamic dispatch.
//!
//! All access is single-consumer: the owning thread is recorded when the
//! loop binds, and every operation asserts it. Violations are programming
//! errors and fatal.

use std::collections::{BinaryHeap, VecDeque};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::tasks::task::DelayedTask;
use crate::tasks::Task;

/// FIFO of freshly arrived tasks awaiting classification.
pub(crate) struct TriageQueue {
    queue: VecDeque<Task>,
}

impl TriageQueue {
    fn new() -> Self {
        TriageQueue {
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn has_tasks(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.queue.pop_front()
    }

    /// The reload target handed to the staging swap.
    pub(crate) fn queue_mut(&mut self) -> &mut VecDeque<Task> {
        &mut self.queue
    }
}

/// Min-order queue of delayed tasks, keyed by `(due_time, sequence)`.
pub(crate) struct DelayedQueue {
    heap: BinaryHeap<DelayedTask>,
}

impl DelayedQueue {
    fn new() -> Self {
        DelayedQueue {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, task: Task) {
        self.heap.push(DelayedTask(task));
    }

    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(DelayedTask::into_inner)
    }

    /// Drops leading entries whose callback was already consumed. Stale
    /// entries must not make the queue report work it cannot run.
    pub(crate) fn drop_consumed(&mut self, pending_high_res: &mut usize) {
        loop {
            match self.heap.peek() {
                Some(front) if front.0.is_consumed() => {
                    if let Some(stale) = self.heap.pop() {
                        if stale.0.is_high_res() {
                            *pending_high_res = pending_high_res.saturating_sub(1);
                        }
                    }
                }
                _ => return,
            }
        }
    }

    pub(crate) fn peek_due(&self) -> Option<Instant> {
        self.heap.peek().and_then(|entry| entry.0.due_time())
    }

    pub(crate) fn front_sequence(&self) -> Option<u32> {
        self.heap.peek().map(|entry| entry.0.sequence_number())
    }
}

/// FIFO of non-reentrant tasks postponed because a nested session was
/// active when they came up.
pub(crate) struct DeferredQueue {
    queue: VecDeque<Task>,
}

impl DeferredQueue {
    fn new() -> Self {
        DeferredQueue {
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.queue.pop_front()
    }
}

/// The owner thread's view of pending work.
pub(crate) struct WorkSet {
    owner: Option<ThreadId>,
    pub(crate) triage: TriageQueue,
    pub(crate) delayed: DelayedQueue,
    pub(crate) deferred: DeferredQueue,
    /// Aggregate count of queued tasks that requested high-resolution
    /// timing, maintained so nothing ever rescans the queues for it.
    pub(crate) pending_high_res: usize,
}

impl WorkSet {
    pub(crate) fn new() -> Self {
        WorkSet {
            owner: None,
            triage: TriageQueue::new(),
            delayed: DelayedQueue::new(),
            deferred: DeferredQueue::new(),
            pending_high_res: 0,
        }
    }

    pub(crate) fn bind_owner(&mut self) {
        assert!(
            self.owner.is_none(),
            "work set is already bound to a thread"
        );
        self.owner = Some(thread::current().id());
    }

    pub(crate) fn assert_owner(&self) {
        match self.owner {
            Some(owner) => assert_eq!(
                owner,
                thread::current().id(),
                "task queues drained from a thread that does not own them"
            ),
            None => panic!("task queues drained before the loop was bound"),
        }
    }

    pub(crate) fn delayed_push(&mut self, task: Task) {
        if task.is_high_res() {
            self.pending_high_res += 1;
        }
        self.delayed.push(task);
    }

    pub(crate) fn deferred_push(&mut self, task: Task) {
        if task.is_high_res() {
            self.pending_high_res += 1;
        }
        self.deferred.push(task);
    }

    /// Earliest pending due time, after lazily discarding consumed entries.
    pub(crate) fn delayed_next_due(&mut self) -> Option<Instant> {
        self.delayed.drop_consumed(&mut self.pending_high_res);
        self.delayed.peek_due()
    }

    /// Clears triage, migrating delayed tasks into the delayed queue
    /// rather than dropping them; they are cleared separately.
    pub(crate) fn clear_triage(&mut self) {
        while let Some(task) = self.triage.pop() {
            if task.is_high_res() {
                self.pending_high_res = self.pending_high_res.saturating_sub(1);
            }
            if task.due_time().is_some() {
                self.delayed_push(task);
            }
        }
    }

    pub(crate) fn clear_deferred(&mut self) {
        while let Some(task) = self.deferred.pop() {
            if task.is_high_res() {
                self.pending_high_res = self.pending_high_res.saturating_sub(1);
            }
        }
    }

    pub(crate) fn clear_delayed(&mut self) {
        while let Some(task) = self.delayed.pop() {
            if task.is_high_res() {
                self.pending_high_res = self.pending_high_res.saturating_sub(1);
            }
        }
    }
}
