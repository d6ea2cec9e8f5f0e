//! # The task loop.
//!
//! A [`TaskLoop`] drives one thread: it drains the intake queue, enforces
//! due times and re-entrancy rules, fires observers, and sleeps in its
//! pump when idle. The loop is bound to exactly one OS thread for its
//! whole bound lifetime; binding happens once and is irreversible.
//!
//! Construction comes in two shapes:
//! - [`TaskLoop::new`] creates and binds on the calling thread.
//! - [`TaskLoop::unbound`] returns a [`UnboundTaskLoop`] whose runner can
//!   be handed out immediately; tasks posted before binding accumulate
//!   without waking anyone, and the loop later binds on whichever thread
//!   calls [`UnboundTaskLoop::bind_to_current_thread`].
//!
//! The loop itself never decides when to run; that is the job of
//! [`RunSession`](crate::RunSession).
//!
//! ## Example
//! ```rust
//! use taskloop::{origin, RunSession, TaskLoop, TaskRunnerExt};
//!
//! let task_loop = TaskLoop::new();
//! let runner = task_loop.task_runner();
//!
//! runner.post(origin!(), || println!("ran on the loop"));
//! RunSession::new().run_until_idle();
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use tracing::{debug, error};

use crate::config::LoopConfig;
use crate::observers::{DestructionObserver, TaskObserver};
use crate::pump::{BlockingPump, PumpDelegate};
use crate::queue::IntakeQueue;
use crate::runner::loop_runner::LoopTaskRunner;
use crate::runner::{handle, PinnedTaskRunner};
use crate::sessions::controller::{self, SessionDelegate};
use crate::tasks::task::{swap_current_trace, TaskTrace};
use crate::tasks::{Reentrancy, Task};

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Rc<LoopCore>>> = const { RefCell::new(None) };
}

/// A loop that has not yet bound to a thread. `Send`: create it anywhere,
/// hand its runner around, then bind on the dispatcher thread.
pub struct UnboundTaskLoop {
    queue: Arc<IntakeQueue>,
    runner: Arc<LoopTaskRunner>,
    config: LoopConfig,
}

impl UnboundTaskLoop {
    fn new(config: LoopConfig) -> Self {
        let queue = Arc::new(IntakeQueue::new(config.always_wake_on_post));
        let runner = Arc::new(LoopTaskRunner::new(queue.clone()));
        UnboundTaskLoop {
            queue,
            runner,
            config,
        }
    }

    /// The loop's runner. Posts made before binding are accepted and held.
    pub fn task_runner(&self) -> Arc<dyn PinnedTaskRunner> {
        self.runner.clone()
    }

    /// Binds to the calling thread: creates the pump, publishes the
    /// thread-local handles, and wakes once if posts already accumulated.
    /// Fatal if the thread already hosts a loop.
    pub fn bind_to_current_thread(self) -> TaskLoop {
        CURRENT_LOOP.with(|slot| {
            assert!(
                slot.borrow().is_none(),
                "a task loop is already bound to this thread"
            );
        });

        let pump = Arc::new(BlockingPump::new());
        let core = Rc::new(LoopCore {
            queue: self.queue,
            pump: pump.clone(),
            runner: self.runner,
            execution_allowed: Cell::new(true),
            recent_time: Cell::new(Instant::now()),
            thread_id: thread::current().id(),
            task_observers: RefCell::new(Vec::new()),
            destruction_observers: RefCell::new(Vec::new()),
            config: self.config,
        });

        core.queue.bind_owner();
        core.runner.bind_to_current_thread();
        handle::bind(core.runner.clone());
        controller::register_delegate_for_current_thread(core.clone());
        core.queue.start_scheduling(pump);

        CURRENT_LOOP.with(|slot| *slot.borrow_mut() = Some(core.clone()));
        debug!(thread = ?core.thread_id, "task loop bound");

        TaskLoop { core }
    }
}

/// A loop bound to the current thread.
///
/// Dropping the loop tears it down: the intake queue stops accepting
/// submissions, pending work is drained (clearing can itself spawn more
/// cleanup work, so draining retries up to a fixed ceiling), destruction
/// observers fire, and the thread-local registrations are removed.
pub struct TaskLoop {
    core: Rc<LoopCore>,
}

impl TaskLoop {
    /// Creates a loop bound to the calling thread.
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    /// Creates a bound loop with explicit configuration.
    pub fn with_config(config: LoopConfig) -> Self {
        UnboundTaskLoop::new(config).bind_to_current_thread()
    }

    /// Creates a loop that binds later; see [`UnboundTaskLoop`].
    pub fn unbound() -> UnboundTaskLoop {
        UnboundTaskLoop::new(LoopConfig::default())
    }

    /// Like [`TaskLoop::unbound`] with explicit configuration.
    pub fn unbound_with_config(config: LoopConfig) -> UnboundTaskLoop {
        UnboundTaskLoop::new(config)
    }

    /// The runner producers use to submit work to this loop.
    pub fn task_runner(&self) -> Arc<dyn PinnedTaskRunner> {
        self.core.runner.clone()
    }

    /// Whether the calling thread is the one this loop is bound to.
    pub fn is_bound_to_current_thread(&self) -> bool {
        self.core.thread_id == thread::current().id()
    }

    /// Whether application tasks may currently run. Cleared for the
    /// duration of each callback; nested sessions re-enable it explicitly.
    pub fn nestable_tasks_allowed(&self) -> bool {
        self.assert_on_own_thread();
        self.core.execution_allowed.get()
    }

    /// Flips the re-entrancy gate. Enabling nudges the pump so pending
    /// application work is noticed by a nested activation.
    pub fn set_nestable_tasks_allowed(&self, allowed: bool) {
        self.assert_on_own_thread();
        self.core.set_nestable_tasks_allowed(allowed);
    }

    /// Count of queued tasks that requested high-resolution timing,
    /// maintained in aggregate so nothing rescans the delayed set.
    pub fn pending_high_res_tasks(&self) -> usize {
        self.assert_on_own_thread();
        self.core.queue.pending_high_res_tasks()
    }

    /// Registers a hook around every executed task. Dispatcher thread only.
    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.assert_is_current();
        self.core.task_observers.borrow_mut().push(observer);
    }

    /// Removes a task observer by identity. Dispatcher thread only.
    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        self.assert_is_current();
        self.core
            .task_observers
            .borrow_mut()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Registers a teardown hook. Dispatcher thread only.
    pub fn add_destruction_observer(&self, observer: Arc<dyn DestructionObserver>) {
        self.assert_is_current();
        self.core.destruction_observers.borrow_mut().push(observer);
    }

    /// Removes a teardown hook by identity. Dispatcher thread only.
    pub fn remove_destruction_observer(&self, observer: &Arc<dyn DestructionObserver>) {
        self.assert_is_current();
        self.core
            .destruction_observers
            .borrow_mut()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    fn assert_on_own_thread(&self) {
        assert!(
            self.is_bound_to_current_thread(),
            "task loop touched from a thread it is not bound to"
        );
    }

    fn assert_is_current(&self) {
        let is_current = CURRENT_LOOP.with(|slot| {
            slot.borrow()
                .as_ref()
                .is_some_and(|current| Rc::ptr_eq(current, &self.core))
        });
        assert!(
            is_current,
            "observers must be registered on the loop's own thread"
        );
    }
}

impl Default for TaskLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskLoop {
    fn drop(&mut self) {
        self.assert_on_own_thread();
        debug_assert_eq!(
            controller::active_session_depth(),
            0,
            "task loop dropped while run sessions are active"
        );

        // Stop accepting work first, so cleanup tasks that try to re-post
        // during the drain are refused rather than re-queued.
        self.core.queue.disconnect_from_loop();

        let mut tasks_remain = true;
        for _ in 0..self.core.config.drain_retries {
            self.core.queue.clear_pending();
            tasks_remain = self.core.queue.triage_has_tasks();
            if !tasks_remain {
                break;
            }
        }
        if tasks_remain {
            error!("pending tasks kept re-spawning during loop teardown");
            panic!("task loop teardown exceeded its drain retry ceiling");
        }

        let observers = self.core.destruction_observers.borrow().clone();
        for observer in &observers {
            observer.will_destroy_current_loop();
        }

        controller::unregister_delegate_for_current_thread();
        handle::clear();
        CURRENT_LOOP.with(|slot| slot.borrow_mut().take());
        debug!(thread = ?self.core.thread_id, "task loop unbound");
    }
}

/// The bound loop's thread-affine state. Shared between the owning
/// [`TaskLoop`], the thread-local current-loop slot, and the session
/// controller; all access happens on the bound thread.
pub(crate) struct LoopCore {
    queue: Arc<IntakeQueue>,
    pump: Arc<BlockingPump>,
    runner: Arc<LoopTaskRunner>,
    /// The re-entrancy gate. Cleared while a callback runs.
    execution_allowed: Cell<bool>,
    /// Cached clock so a backlog of due delayed tasks amortizes `now()`.
    recent_time: Cell<Instant>,
    thread_id: ThreadId,
    task_observers: RefCell<Vec<Arc<dyn TaskObserver>>>,
    destruction_observers: RefCell<Vec<Arc<dyn DestructionObserver>>>,
    config: LoopConfig,
}

impl LoopCore {
    fn set_nestable_tasks_allowed(&self, allowed: bool) {
        if allowed {
            // A nested activation may have started while work was already
            // pending; make sure the pump re-polls.
            self.pump.schedule_work();
        }
        self.execution_allowed.set(allowed);
    }

    /// Runs one task: gate cleared, parent trace published, observers
    /// around the callback. The guard restores the gate and the trace even
    /// if the callback panics.
    fn run_task(&self, mut task: Task) {
        debug_assert!(self.execution_allowed.get());
        self.execution_allowed.set(false);

        let previous_trace = swap_current_trace(Some(TaskTrace::of(&task)));
        let _scope = TaskExecutionScope {
            core: self,
            previous_trace,
        };

        let observers = self.task_observers.borrow().clone();
        for observer in &observers {
            observer.will_process_task(&task);
        }
        self.queue.run_task(&mut task);
        for observer in &observers {
            observer.did_process_task(&task);
        }
    }

    /// Runs `task` now if it may run, or parks it on the deferred queue.
    /// Returns `true` if it ran.
    fn defer_or_run_task(&self, task: Task) -> bool {
        if task.reentrancy() == Reentrancy::Reentrant
            || !controller::is_nested_on_current_thread()
        {
            self.run_task(task);
            return true;
        }
        self.queue.deferred_push(task);
        false
    }

    /// One backlog slot: runs a single deferred task if the thread is no
    /// longer nested.
    fn process_next_deferred_task(&self) -> bool {
        if controller::is_nested_on_current_thread() {
            return false;
        }
        match self.queue.deferred_pop() {
            Some(task) => {
                self.run_task(task);
                true
            }
            None => false,
        }
    }
}

struct TaskExecutionScope<'a> {
    core: &'a LoopCore,
    previous_trace: Option<TaskTrace>,
}

impl Drop for TaskExecutionScope<'_> {
    fn drop(&mut self) {
        swap_current_trace(self.previous_trace);
        self.core.execution_allowed.set(true);
    }
}

impl PumpDelegate for LoopCore {
    fn do_immediate_work(&self) -> bool {
        if !self.execution_allowed.get() {
            return false;
        }

        // Oldest first. Delayed tasks surfacing here are reclassified, and
        // the pump's deadline refreshes when one becomes the earliest.
        while self.queue.triage_has_tasks() {
            let task = self.queue.triage_pop();
            if task.is_consumed() {
                continue;
            }
            if let Some(due) = task.due_time() {
                if self.queue.delayed_push(task) {
                    self.pump.schedule_delayed_work(due);
                }
            } else if self.defer_or_run_task(task) {
                return true;
            }
        }

        false
    }

    fn do_delayed_work(&self, next_due: &mut Option<Instant>) -> bool {
        if !self.execution_allowed.get() {
            self.recent_time.set(Instant::now());
            *next_due = None;
            return false;
        }
        let Some(due) = self.queue.delayed_next_due() else {
            self.recent_time.set(Instant::now());
            *next_due = None;
            return false;
        };

        // When the loop falls behind, many delayed tasks are ready at
        // once; resample the clock only when the cached time has been
        // overtaken, then burn through everything that is ready.
        if due > self.recent_time.get() {
            self.recent_time.set(Instant::now());
            if due > self.recent_time.get() {
                *next_due = Some(due);
                return false;
            }
        }

        let task = self.queue.delayed_pop();
        *next_due = self.queue.delayed_next_due();
        self.defer_or_run_task(task)
    }

    fn do_idle_work(&self) -> bool {
        if self.process_next_deferred_task() {
            return true;
        }

        if controller::should_quit_when_idle() {
            self.pump.quit();
        }

        false
    }
}

impl SessionDelegate for LoopCore {
    fn run_loop(&self, application_tasks_allowed: bool) {
        if application_tasks_allowed && !self.execution_allowed.get() {
            self.execution_allowed.set(true);
            self.pump.run(self);
            self.execution_allowed.set(false);
        } else {
            self.pump.run(self);
        }
    }

    fn quit_pump(&self) {
        self.pump.quit();
    }

    fn ensure_work_scheduled(&self) {
        if self.queue.triage_has_tasks() {
            self.pump.schedule_work();
        }
    }
}
