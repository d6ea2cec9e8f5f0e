//! # Run sessions.
//!
//! A [`RunSession`] is one activation of the current thread's loop. The
//! outermost session drives the loop; a session started from inside a
//! running task is *nested*, and only sessions created with
//! [`RunSession::nestable`] let application tasks run while nested.
//!
//! Two flavors of termination:
//! - [`RunSession::quit`]: stop before the next task starts, even with
//!   work still pending.
//! - [`RunSession::quit_when_idle`]: stop once no work remains.
//!
//! Both are available off-thread through a [`QuitHandle`], which re-posts
//! itself to the owning sequence when called from elsewhere. A quit
//! requested on a suspended outer session is honored as soon as control
//! returns to it.
//!
//! ## Example
//! ```rust
//! use taskloop::{origin, RunSession, TaskLoop, TaskRunnerExt};
//!
//! let task_loop = TaskLoop::new();
//! let runner = task_loop.task_runner();
//!
//! runner.post(origin!(), || println!("first"));
//! runner.post(origin!(), || println!("second"));
//!
//! let session = RunSession::new();
//! session.run_until_idle();
//! ```

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::observers::NestingObserver;
use crate::runner::handle;
use crate::runner::SequencedTaskRunner;
use crate::runner::TaskRunner;
use crate::sessions::controller::{self, SessionController};

/// Whether a session permits application tasks while nested.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionKind {
    /// Nested activations run no application tasks; only quitting exits.
    Default,
    /// Nested activations run reentrant application tasks.
    NestableTasksAllowed,
}

/// Shared, thread-safe session flags. Quit requests may originate on any
/// thread; everything else touches this on the owning thread only.
pub(crate) struct SessionState {
    pub(crate) quit_called: AtomicBool,
    pub(crate) quit_when_idle: AtomicBool,
    pub(crate) running: AtomicBool,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            quit_called: AtomicBool::new(false),
            quit_when_idle: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }
}

/// One activation of the current thread's loop.
///
/// Created on the thread it runs on; a loop must already be bound there.
pub struct RunSession {
    controller: Rc<SessionController>,
    state: Arc<SessionState>,
    kind: SessionKind,
    origin_runner: Arc<dyn SequencedTaskRunner>,
}

impl RunSession {
    /// A session that runs no application tasks while nested.
    pub fn new() -> Self {
        Self::with_kind(SessionKind::Default)
    }

    /// A session that runs reentrant application tasks even while nested.
    pub fn nestable() -> Self {
        Self::with_kind(SessionKind::NestableTasksAllowed)
    }

    fn with_kind(kind: SessionKind) -> Self {
        let Some(controller) = controller::current() else {
            panic!("run sessions require a task loop bound to this thread");
        };
        RunSession {
            controller,
            state: Arc::new(SessionState::new()),
            kind,
            origin_runner: handle::current_sequenced(),
        }
    }

    /// Runs the loop until this session is quit. Returns immediately if
    /// quit was already requested before the call.
    pub fn run(&self) {
        if !self.before_run() {
            return;
        }

        // Application tasks run in the outermost session, and in nested
        // ones only when explicitly allowed.
        let application_tasks_allowed =
            self.controller.depth() == 1 || self.kind == SessionKind::NestableTasksAllowed;
        self.controller.delegate().run_loop(application_tasks_allowed);

        self.after_run();
    }

    /// Runs the loop until it would otherwise go idle, then returns.
    pub fn run_until_idle(&self) {
        self.state.quit_when_idle.store(true, Ordering::SeqCst);
        self.run();
    }

    /// Whether this session is currently inside [`RunSession::run`].
    pub fn running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Stops this session before the next task starts. Pending work stays
    /// queued. Callable before `run` to make it a no-op.
    pub fn quit(&self) {
        controller::quit_session(&self.state);
    }

    /// Stops this session once no immediate, delayed-and-due, or deferred
    /// work remains.
    pub fn quit_when_idle(&self) {
        self.state.quit_when_idle.store(true, Ordering::SeqCst);
    }

    /// A `Send + Clone` handle that quits this session from any thread.
    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle {
            state: self.state.clone(),
            origin_runner: self.origin_runner.clone(),
        }
    }

    /// Whether any session is active on the calling thread.
    pub fn is_running_on_current_thread() -> bool {
        controller::active_session_depth() > 0
    }

    /// Whether the calling thread is inside a nested session.
    pub fn is_nested_on_current_thread() -> bool {
        controller::is_nested_on_current_thread()
    }

    /// Registers a nesting observer on the calling thread's controller.
    /// Fatal if no loop is bound here.
    pub fn add_nesting_observer_on_current_thread(observer: Arc<dyn NestingObserver>) {
        let Some(controller) = controller::current() else {
            panic!("nesting observers require a task loop bound to this thread");
        };
        controller.add_nesting_observer(observer);
    }

    /// Removes a previously registered nesting observer by identity.
    pub fn remove_nesting_observer_on_current_thread(observer: &Arc<dyn NestingObserver>) {
        if let Some(controller) = controller::current() {
            controller.remove_nesting_observer(observer);
        }
    }

    fn before_run(&self) -> bool {
        if self.state.quit_called.load(Ordering::SeqCst) {
            return false;
        }

        self.controller.push(self.state.clone());

        if self.controller.depth() > 1 {
            self.controller.notify_begin_nested();
            if self.kind == SessionKind::NestableTasksAllowed {
                self.controller.delegate().ensure_work_scheduled();
            }
        }

        self.state.running.store(true, Ordering::SeqCst);
        true
    }

    fn after_run(&self) {
        self.state.running.store(false, Ordering::SeqCst);

        let resumed = self.controller.pop(&self.state);

        if let Some(resumed) = resumed {
            self.controller.notify_exit_nested();

            // Honor a quit that was requested on the session we are
            // returning to while it was suspended.
            if resumed.quit_called.load(Ordering::SeqCst) {
                self.controller.delegate().quit_pump();
            }
        }
    }
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Quits one [`RunSession`] from any thread.
///
/// When called off the owning sequence, the request is re-posted as a task
/// onto it; if the owning loop has shut down, the request is dropped with
/// the queue.
#[derive(Clone)]
pub struct QuitHandle {
    state: Arc<SessionState>,
    origin_runner: Arc<dyn SequencedTaskRunner>,
}

impl QuitHandle {
    /// Stops the session before its next task.
    pub fn quit(&self) {
        if self.origin_runner.runs_tasks_in_current_sequence() {
            controller::quit_session(&self.state);
        } else {
            let state = self.state.clone();
            self.origin_runner.post_task(
                crate::origin!(),
                Box::new(move || controller::quit_session(&state)),
            );
        }
    }

    /// Stops the session once its loop has no work left.
    pub fn quit_when_idle(&self) {
        if self.origin_runner.runs_tasks_in_current_sequence() {
            self.state.quit_when_idle.store(true, Ordering::SeqCst);
        } else {
            let state = self.state.clone();
            self.origin_runner.post_task(
                crate::origin!(),
                Box::new(move || state.quit_when_idle.store(true, Ordering::SeqCst)),
            );
        }
    }
}
