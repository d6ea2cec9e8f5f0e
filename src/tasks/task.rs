//! # The task record.
//!
//! A [`Task`] is one scheduled unit of callback work plus the metadata the
//! loop needs to order and dispatch it: the posting site, an optional
//! absolute due time, a sequence number assigned when the owning loop
//! accepts it, a re-entrancy flag, and a fixed-depth causal backtrace of
//! the posting sites that led here.
//!
//! ## Ordering
//! The delayed queue orders tasks by `(due_time, sequence_number)`. The
//! sequence tie-break uses wrapping arithmetic so that submission order
//! survives counter wraparound.

use std::cell::Cell;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::origin::Origin;

/// A single-invocation unit of work, runnable from any thread it is handed
/// to. The callback may itself post more tasks.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Whether a task may run while the thread is already executing another
/// task inside a nested run session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reentrancy {
    /// May run inside a nested session.
    Reentrant,
    /// Must not run nested; postponed until the nested session exits.
    NonReentrant,
}

/// Depth of the causal backtrace carried by each task.
pub const BACKTRACE_DEPTH: usize = 4;

/// Delays shorter than this request high-resolution timing. Tracked in
/// aggregate by the intake queue so the pump can pick a timer precision
/// without rescanning the delayed set.
const HIGH_RESOLUTION_DELAY_CEILING: Duration = Duration::from_millis(32);

/// One queued unit of work plus its scheduling metadata.
pub struct Task {
    callback: Option<Callback>,
    origin: Origin,
    backtrace: [Origin; BACKTRACE_DEPTH],
    due_time: Option<Instant>,
    sequence_num: u32,
    reentrancy: Reentrancy,
    high_res: bool,
}

impl Task {
    /// Builds a task record on the posting thread. A zero delay means
    /// "immediate"; a positive delay fixes an absolute due time now.
    ///
    /// The causal backtrace is captured automatically from the task
    /// currently executing on this thread, if any: its origin becomes the
    /// first entry and its own chain shifts right by one.
    pub(crate) fn new(
        origin: Origin,
        callback: Callback,
        delay: Duration,
        reentrancy: Reentrancy,
    ) -> Self {
        let backtrace = match current_trace() {
            Some(parent) => {
                let mut chain = [Origin::UNSET; BACKTRACE_DEPTH];
                chain[0] = parent.origin;
                chain[1..].copy_from_slice(&parent.backtrace[..BACKTRACE_DEPTH - 1]);
                chain
            }
            None => [Origin::UNSET; BACKTRACE_DEPTH],
        };

        let due_time = if delay.is_zero() {
            None
        } else {
            Some(Instant::now() + delay)
        };

        Task {
            callback: Some(callback),
            origin,
            backtrace,
            due_time,
            sequence_num: 0,
            reentrancy,
            high_res: !delay.is_zero() && delay < HIGH_RESOLUTION_DELAY_CEILING,
        }
    }

    /// The posting site.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Up to [`BACKTRACE_DEPTH`] ancestor posting sites, most recent first;
    /// unset entries pad the tail.
    pub fn backtrace(&self) -> &[Origin; BACKTRACE_DEPTH] {
        &self.backtrace
    }

    /// Absolute time at which the task becomes eligible, or `None` for an
    /// immediate task.
    pub fn due_time(&self) -> Option<Instant> {
        self.due_time
    }

    /// The acceptance-order sequence number assigned by the owning loop.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_num
    }

    /// Whether this task may run inside a nested session.
    pub fn reentrancy(&self) -> Reentrancy {
        self.reentrancy
    }

    /// Whether the delay requested high-resolution timing.
    pub fn is_high_res(&self) -> bool {
        self.high_res
    }

    pub(crate) fn set_sequence_num(&mut self, sequence_num: u32) {
        self.sequence_num = sequence_num;
    }

    /// True once the callback has been taken (run or cancelled). Consumed
    /// tasks may remain physically queued and must be skippable.
    pub(crate) fn is_consumed(&self) -> bool {
        self.callback.is_none()
    }

    pub(crate) fn take_callback(&mut self) -> Option<Callback> {
        self.callback.take()
    }
}

/// Returns `true` if sequence `a` was accepted before sequence `b`,
/// tolerating counter wraparound.
fn accepted_before(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// Heap entry for the delayed queue. Ordered so that the earliest
/// `(due_time, sequence_number)` is the greatest element, matching the
/// max-heap behavior of [`std::collections::BinaryHeap`].
pub(crate) struct DelayedTask(pub(crate) Task);

impl DelayedTask {
    pub(crate) fn into_inner(self) -> Task {
        self.0
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier due time pops first; reversed because the heap is a
        // max-heap.
        match other.0.due_time.cmp(&self.0.due_time) {
            Ordering::Equal => {
                let (a, b) = (self.0.sequence_num, other.0.sequence_num);
                if a == b {
                    Ordering::Equal
                } else if accepted_before(a, b) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            unequal => unequal,
        }
    }
}

/// Snapshot of the currently-executing task, published in thread-local
/// storage by the dispatcher for the duration of the callback so that
/// tasks posted from inside it inherit the causal chain.
#[derive(Clone, Copy)]
pub(crate) struct TaskTrace {
    pub(crate) origin: Origin,
    pub(crate) backtrace: [Origin; BACKTRACE_DEPTH],
}

impl TaskTrace {
    pub(crate) fn of(task: &Task) -> Self {
        TaskTrace {
            origin: task.origin,
            backtrace: task.backtrace,
        }
    }
}

thread_local! {
    static CURRENT_TRACE: Cell<Option<TaskTrace>> = const { Cell::new(None) };
}

/// Installs `trace` as the current execution trace, returning the previous
/// value so the caller can restore it when the callback finishes.
pub(crate) fn swap_current_trace(trace: Option<TaskTrace>) -> Option<TaskTrace> {
    CURRENT_TRACE.with(|slot| slot.replace(trace))
}

fn current_trace() -> Option<TaskTrace> {
    CURRENT_TRACE.with(|slot| slot.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn immediate(seq: u32) -> Task {
        let mut task = Task::new(
            crate::origin!(),
            Box::new(|| {}),
            Duration::ZERO,
            Reentrancy::Reentrant,
        );
        task.set_sequence_num(seq);
        task
    }

    fn delayed(due: Instant, seq: u32) -> DelayedTask {
        let mut task = Task::new(
            crate::origin!(),
            Box::new(|| {}),
            Duration::from_millis(1),
            Reentrancy::Reentrant,
        );
        task.due_time = Some(due);
        task.set_sequence_num(seq);
        DelayedTask(task)
    }

    #[test]
    fn test_zero_delay_is_immediate() {
        let task = immediate(0);
        assert!(task.due_time().is_none());
        assert!(!task.is_high_res());
    }

    #[test]
    fn test_short_delay_is_high_res() {
        let task = Task::new(
            crate::origin!(),
            Box::new(|| {}),
            Duration::from_millis(5),
            Reentrancy::Reentrant,
        );
        assert!(task.is_high_res());
        assert!(task.due_time().is_some());

        let task = Task::new(
            crate::origin!(),
            Box::new(|| {}),
            Duration::from_secs(1),
            Reentrancy::Reentrant,
        );
        assert!(!task.is_high_res());
    }

    #[test]
    fn test_due_time_ordering_wins_over_sequence() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(delayed(now + Duration::from_millis(20), 1));
        heap.push(delayed(now + Duration::from_millis(10), 2));

        let first = heap.pop().unwrap();
        assert_eq!(first.0.sequence_number(), 2, "earlier due time pops first");
    }

    #[test]
    fn test_equal_due_times_pop_in_submission_order() {
        let due = Instant::now() + Duration::from_millis(10);
        let mut heap = BinaryHeap::new();
        heap.push(delayed(due, 7));
        heap.push(delayed(due, 5));
        heap.push(delayed(due, 6));

        let order: Vec<u32> = std::iter::from_fn(|| heap.pop())
            .map(|t| t.0.sequence_number())
            .collect();
        assert_eq!(order, vec![5, 6, 7]);
    }

    #[test]
    fn test_sequence_wraparound_preserves_submission_order() {
        let due = Instant::now() + Duration::from_millis(10);
        let mut heap = BinaryHeap::new();
        // u32::MAX was accepted just before the counter wrapped to 0.
        heap.push(delayed(due, 0));
        heap.push(delayed(due, u32::MAX));

        assert_eq!(heap.pop().unwrap().0.sequence_number(), u32::MAX);
        assert_eq!(heap.pop().unwrap().0.sequence_number(), 0);
    }

    #[test]
    fn test_accepted_before_is_wraparound_safe() {
        assert!(accepted_before(1, 2));
        assert!(!accepted_before(2, 1));
        assert!(accepted_before(u32::MAX, 0));
        assert!(!accepted_before(0, u32::MAX));
    }

    #[test]
    fn test_backtrace_empty_without_running_task() {
        let task = immediate(0);
        assert!(task.backtrace().iter().all(|o| !o.is_set()));
    }

    #[test]
    fn test_backtrace_inherits_parent_chain() {
        let parent_origin = Origin::from_parts("src/parent.rs", 10);
        let grandparent = Origin::from_parts("src/grandparent.rs", 20);
        let mut parent_chain = [Origin::UNSET; BACKTRACE_DEPTH];
        parent_chain[0] = grandparent;

        let prev = swap_current_trace(Some(TaskTrace {
            origin: parent_origin,
            backtrace: parent_chain,
        }));
        let task = immediate(0);
        swap_current_trace(prev);

        assert_eq!(task.backtrace()[0], parent_origin);
        assert_eq!(task.backtrace()[1], grandparent);
        assert!(!task.backtrace()[2].is_set());
    }

    #[test]
    fn test_consumed_task_is_skippable() {
        let mut task = immediate(0);
        assert!(!task.is_consumed());
        let callback = task.take_callback();
        assert!(callback.is_some());
        assert!(task.is_consumed());
        assert!(task.take_callback().is_none());
    }
}
