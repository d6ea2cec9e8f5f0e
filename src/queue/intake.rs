//! # The cross-thread intake queue.
//!
//! [`IntakeQueue`] is the single shared mutable resource crossing thread
//! boundaries: a multi-producer staging list any thread may post to, owned
//! by exactly one loop that periodically swaps it into its local work set.
//!
//! Two independent locks protect it: the staging lock (submission state,
//! sequence counter) and the pump-handle lock (the back-reference used to
//! wake the owning loop). Neither is ever held while acquiring the other,
//! and neither is ever held across a callback.
//!
//! ## Shutdown
//! [`IntakeQueue::disconnect_from_loop`] stops accepting submissions, so
//! every later post returns `false` and its callback is dropped without
//! running, and forgets the pump back-reference so the loop can be
//! destroyed while producers still hold the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::origin::Origin;
use crate::pump::BlockingPump;
use crate::queue::work_set::WorkSet;
use crate::tasks::{Callback, Reentrancy, Task};

struct Staging {
    tasks: VecDeque<Task>,
    accept_new_tasks: bool,
    /// False until the owning loop binds; posts before that accumulate
    /// without waking anything.
    ready_for_scheduling: bool,
    /// A wakeup has been issued and not yet consumed by a reload.
    loop_scheduled: bool,
    next_sequence_num: u32,
    high_res_count: usize,
}

/// Per-loop staging area for tasks posted from any thread, plus the
/// owner-side work set.
pub(crate) struct IntakeQueue {
    staging: Mutex<Staging>,
    pump_handle: Mutex<Option<Arc<BlockingPump>>>,
    work: Mutex<WorkSet>,
    always_wake_on_post: bool,
}

impl IntakeQueue {
    pub(crate) fn new(always_wake_on_post: bool) -> Self {
        IntakeQueue {
            staging: Mutex::new(Staging {
                tasks: VecDeque::new(),
                accept_new_tasks: true,
                ready_for_scheduling: false,
                loop_scheduled: false,
                next_sequence_num: 0,
                high_res_count: 0,
            }),
            pump_handle: Mutex::new(None),
            work: Mutex::new(WorkSet::new()),
            always_wake_on_post,
        }
    }

    // ---- Producer side (any thread) ----

    /// Builds a task record and submits it. Returns `false`, dropping the
    /// callback unrun, if the owning loop has begun shutdown.
    pub(crate) fn post_task(
        &self,
        origin: Origin,
        callback: Callback,
        delay: Duration,
        reentrancy: Reentrancy,
    ) -> bool {
        self.post_pending_task(Task::new(origin, callback, delay, reentrancy))
    }

    fn post_pending_task(&self, mut task: Task) -> bool {
        let origin = task.origin();
        let mut wake = false;
        {
            let mut staging = self.staging.lock();
            if !staging.accept_new_tasks {
                drop(staging);
                trace!(%origin, "dropping task posted after loop shutdown");
                return false;
            }

            task.set_sequence_num(staging.next_sequence_num);
            staging.next_sequence_num = staging.next_sequence_num.wrapping_add(1);
            if task.is_high_res() {
                staging.high_res_count += 1;
            }

            let was_empty = staging.tasks.is_empty();
            staging.tasks.push_back(task);

            if staging.ready_for_scheduling
                && (self.always_wake_on_post || (!staging.loop_scheduled && was_empty))
            {
                staging.loop_scheduled = true;
                wake = true;
            }
        }

        if wake {
            let pump = self.pump_handle.lock();
            if let Some(pump) = pump.as_ref() {
                pump.schedule_work();
            }
        }
        true
    }

    /// Stops accepting submissions and forgets the pump back-reference.
    pub(crate) fn disconnect_from_loop(&self) {
        self.staging.lock().accept_new_tasks = false;
        *self.pump_handle.lock() = None;
    }

    // ---- Binding (owning thread, once) ----

    /// Records the owning thread for the single-consumer discipline checks.
    pub(crate) fn bind_owner(&self) {
        self.work.lock().bind_owner();
    }

    /// Installs the pump back-reference and starts waking on submissions.
    /// Wakes once immediately if posts already accumulated before binding.
    pub(crate) fn start_scheduling(&self, pump: Arc<BlockingPump>) {
        *self.pump_handle.lock() = Some(pump);
        let wake = {
            let mut staging = self.staging.lock();
            assert!(
                !staging.ready_for_scheduling,
                "intake queue scheduling started twice"
            );
            staging.ready_for_scheduling = true;
            if staging.tasks.is_empty() {
                false
            } else {
                staging.loop_scheduled = true;
                true
            }
        };
        if wake {
            let pump = self.pump_handle.lock();
            if let Some(pump) = pump.as_ref() {
                pump.schedule_work();
            }
        }
    }

    // ---- Consumer side (owning thread only) ----

    fn work(&self) -> MutexGuard<'_, WorkSet> {
        let work = self.work.lock();
        work.assert_owner();
        work
    }

    /// Atomically swaps the staging list into `target` and returns how many
    /// of the moved tasks requested high-resolution timing.
    fn reload_staged(&self, target: &mut VecDeque<Task>) -> usize {
        assert!(target.is_empty(), "reload target must be empty");
        let mut staging = self.staging.lock();
        if staging.tasks.is_empty() {
            // Nothing arrived since the last wakeup; allow the next
            // empty-to-non-empty post to wake the loop again.
            staging.loop_scheduled = false;
        } else {
            std::mem::swap(&mut staging.tasks, target);
        }
        std::mem::take(&mut staging.high_res_count)
    }

    fn reload_triage_if_empty(&self, work: &mut WorkSet) {
        if !work.triage.has_tasks() {
            work.pending_high_res += self.reload_staged(work.triage.queue_mut());
        }
    }

    pub(crate) fn triage_has_tasks(&self) -> bool {
        let mut work = self.work();
        self.reload_triage_if_empty(&mut work);
        work.triage.has_tasks()
    }

    pub(crate) fn triage_pop(&self) -> Task {
        let mut work = self.work();
        self.reload_triage_if_empty(&mut work);
        let Some(task) = work.triage.pop() else {
            panic!("triage pop with no pending tasks");
        };
        if task.is_high_res() {
            work.pending_high_res = work.pending_high_res.saturating_sub(1);
        }
        task
    }

    /// Pushes into the delayed queue. Returns `true` if the task is now the
    /// earliest entry, meaning the pump's deadline needs refreshing.
    pub(crate) fn delayed_push(&self, task: Task) -> bool {
        let mut work = self.work();
        let sequence = task.sequence_number();
        work.delayed_push(task);
        work.delayed.front_sequence() == Some(sequence)
    }

    /// Earliest pending due time, after lazily discarding entries whose
    /// callback was already consumed. `None` means no delayed work.
    pub(crate) fn delayed_next_due(&self) -> Option<Instant> {
        self.work().delayed_next_due()
    }

    pub(crate) fn delayed_pop(&self) -> Task {
        let mut work = self.work();
        let Some(task) = work.delayed.pop() else {
            panic!("delayed pop with no pending tasks");
        };
        if task.is_high_res() {
            work.pending_high_res = work.pending_high_res.saturating_sub(1);
        }
        task
    }

    pub(crate) fn deferred_push(&self, task: Task) {
        self.work().deferred_push(task);
    }

    pub(crate) fn deferred_pop(&self) -> Option<Task> {
        let mut work = self.work();
        let task = work.deferred.pop();
        if let Some(task) = &task {
            if task.is_high_res() {
                work.pending_high_res = work.pending_high_res.saturating_sub(1);
            }
        }
        task
    }

    /// One teardown round: clear triage (migrating delayed tasks into the
    /// delayed queue), then the deferred and delayed queues.
    pub(crate) fn clear_pending(&self) {
        let mut work = self.work();
        work.clear_triage();
        work.clear_deferred();
        work.clear_delayed();
    }

    /// The run-task entry point: consumes and invokes the callback. Never
    /// called with a lock held.
    pub(crate) fn run_task(&self, task: &mut Task) {
        if let Some(callback) = task.take_callback() {
            callback();
        }
    }

    pub(crate) fn pending_high_res_tasks(&self) -> usize {
        self.work().pending_high_res
    }

    #[cfg(test)]
    fn loop_scheduled_for_test(&self) -> bool {
        self.staging.lock().loop_scheduled
    }

    #[cfg(test)]
    fn staged_len_for_test(&self) -> usize {
        self.staging.lock().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn noop() -> Callback {
        Box::new(|| {})
    }

    fn bound_queue(always_wake: bool) -> (IntakeQueue, Arc<BlockingPump>) {
        let queue = IntakeQueue::new(always_wake);
        let pump = Arc::new(BlockingPump::new());
        queue.bind_owner();
        queue.start_scheduling(pump.clone());
        (queue, pump)
    }

    #[test]
    fn test_post_assigns_sequence_numbers_in_order() {
        let (queue, _pump) = bound_queue(false);
        assert!(queue.post_task(crate::origin!(), noop(), Duration::ZERO, Reentrancy::Reentrant));
        assert!(queue.post_task(crate::origin!(), noop(), Duration::ZERO, Reentrancy::Reentrant));

        let first = queue.triage_pop();
        let second = queue.triage_pop();
        assert_eq!(first.sequence_number(), 0);
        assert_eq!(second.sequence_number(), 1);
    }

    #[test]
    fn test_post_after_disconnect_is_refused_and_callback_dropped() {
        let (queue, _pump) = bound_queue(false);
        queue.disconnect_from_loop();

        static RAN: AtomicBool = AtomicBool::new(false);
        let accepted = queue.post_task(
            crate::origin!(),
            Box::new(|| RAN.store(true, Ordering::SeqCst)),
            Duration::ZERO,
            Reentrancy::Reentrant,
        );
        assert!(!accepted);
        assert!(!RAN.load(Ordering::SeqCst), "refused callback must not run");
        assert!(!queue.triage_has_tasks());
    }

    #[test]
    fn test_wake_flag_set_only_on_empty_to_non_empty() {
        let (queue, _pump) = bound_queue(false);
        assert!(!queue.loop_scheduled_for_test());

        queue.post_task(crate::origin!(), noop(), Duration::ZERO, Reentrancy::Reentrant);
        assert!(queue.loop_scheduled_for_test());
        queue.post_task(crate::origin!(), noop(), Duration::ZERO, Reentrancy::Reentrant);
        assert_eq!(queue.staged_len_for_test(), 2);

        // Draining the staged tasks re-arms the wakeup.
        assert!(queue.triage_has_tasks());
        queue.triage_pop();
        queue.triage_pop();
        assert!(!queue.triage_has_tasks());
        assert!(!queue.loop_scheduled_for_test());
    }

    #[test]
    fn test_posts_before_binding_accumulate_silently() {
        let queue = IntakeQueue::new(false);
        queue.post_task(crate::origin!(), noop(), Duration::ZERO, Reentrancy::Reentrant);
        assert!(!queue.loop_scheduled_for_test());

        let pump = Arc::new(BlockingPump::new());
        queue.bind_owner();
        queue.start_scheduling(pump);
        assert!(queue.loop_scheduled_for_test());
        assert!(queue.triage_has_tasks());
    }

    #[test]
    fn test_reload_reports_high_res_count() {
        let (queue, _pump) = bound_queue(false);
        queue.post_task(
            crate::origin!(),
            noop(),
            Duration::from_millis(5),
            Reentrancy::Reentrant,
        );
        queue.post_task(
            crate::origin!(),
            noop(),
            Duration::from_secs(5),
            Reentrancy::Reentrant,
        );

        assert!(queue.triage_has_tasks());
        assert_eq!(queue.pending_high_res_tasks(), 1);

        // Popping the high-res task drops the aggregate back to zero.
        let first = queue.triage_pop();
        assert!(first.is_high_res());
        assert_eq!(queue.pending_high_res_tasks(), 0);
    }

    #[test]
    fn test_clear_triage_migrates_delayed_tasks() {
        let (queue, _pump) = bound_queue(false);
        queue.post_task(
            crate::origin!(),
            noop(),
            Duration::from_secs(60),
            Reentrancy::Reentrant,
        );
        queue.post_task(crate::origin!(), noop(), Duration::ZERO, Reentrancy::Reentrant);

        assert!(queue.triage_has_tasks());
        {
            let mut work = queue.work();
            work.clear_triage();
        }
        assert!(
            queue.delayed_next_due().is_some(),
            "delayed task must survive triage clearing"
        );
    }

    #[test]
    fn test_delayed_queue_skips_consumed_entries() {
        let (queue, _pump) = bound_queue(false);
        let mut stale = Task::new(
            crate::origin!(),
            noop(),
            Duration::from_millis(10),
            Reentrancy::Reentrant,
        );
        stale.take_callback();
        queue.delayed_push(stale);
        assert!(queue.delayed_next_due().is_none());

        let live = Task::new(
            crate::origin!(),
            noop(),
            Duration::from_millis(10),
            Reentrancy::Reentrant,
        );
        queue.delayed_push(live);
        assert!(queue.delayed_next_due().is_some());
    }

    #[test]
    fn test_delayed_push_reports_new_front() {
        let (queue, _pump) = bound_queue(false);
        let far = Task::new(
            crate::origin!(),
            noop(),
            Duration::from_secs(60),
            Reentrancy::Reentrant,
        );
        let near = Task::new(
            crate::origin!(),
            noop(),
            Duration::from_millis(10),
            Reentrancy::Reentrant,
        );
        assert!(queue.delayed_push(far), "first entry is always the front");
        assert!(queue.delayed_push(near), "earlier deadline becomes the front");
        let later = Task::new(
            crate::origin!(),
            noop(),
            Duration::from_secs(120),
            Reentrancy::Reentrant,
        );
        assert!(!queue.delayed_push(later));
    }
}
