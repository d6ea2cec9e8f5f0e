//! # Observation hooks.
//!
//! Simple callback interfaces invoked synchronously from the dispatcher
//! thread. Registering or unregistering them from any other thread is a
//! caller error.
//!
//! - [`TaskObserver`]: fires immediately before and after each task runs.
//! - [`DestructionObserver`]: fires while the loop is being torn down,
//!   after pending work has been drained.
//! - [`NestingObserver`]: fires when a nested run session begins or exits
//!   on the current thread.
//!
//! Observers are registered as `Arc<dyn ...>` and removed by pointer
//! identity.

use crate::tasks::Task;

/// Hooks around every task the loop executes.
pub trait TaskObserver {
    /// Called on the dispatcher thread just before `task`'s callback runs.
    fn will_process_task(&self, task: &Task);

    /// Called on the dispatcher thread just after `task`'s callback
    /// returned.
    fn did_process_task(&self, task: &Task);
}

/// Notified synchronously while the loop tears down, before its queues are
/// released. Posting to the loop from this hook is refused.
pub trait DestructionObserver {
    fn will_destroy_current_loop(&self);
}

/// Notified when run sessions nest on the current thread.
pub trait NestingObserver {
    /// A session just became nested (stack depth went above one).
    fn on_begin_nested_session(&self);

    /// A nested session just exited; the session below resumes.
    fn on_exit_nested_session(&self);
}

#[cfg(feature = "logging")]
mod log;
#[cfg(feature = "logging")]
pub use log::LogObserver;
