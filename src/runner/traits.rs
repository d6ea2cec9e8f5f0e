//! # Submission capabilities.
//!
//! Three narrowing capability levels:
//! - [`TaskRunner`]: post a task, possibly delayed, to some execution
//!   context, and ask whether the caller is already running on it.
//! - [`SequencedTaskRunner`]: the context is a logical sequence; adds
//!   non-reentrant posting, which guarantees the task never runs nested
//!   inside another task on the same sequence.
//! - [`PinnedTaskRunner`]: the sequence is literally one dedicated OS
//!   thread.
//!
//! ## Ordering guarantee
//! For tasks A and B posted to the same sequence, if B is posted after A
//! returns with a delay at least A's delay, and B is non-reentrant or A is
//! reentrant, then B does not begin before A finishes.

use std::sync::Arc;
use std::time::Duration;

use crate::origin::Origin;
use crate::runner::handle;
use crate::runner::relay;
use crate::tasks::Callback;

/// # Base submission capability.
///
/// Implementations accept tasks from any thread. Posting returns `false`
/// when the destination has shut down; the callback is then destroyed
/// without running and the post must not be retried implicitly.
pub trait TaskRunner: Send + Sync {
    /// Posts `callback` to run after `delay` (zero means as soon as the
    /// destination drains its queue to it).
    fn post_delayed_task(&self, origin: Origin, callback: Callback, delay: Duration) -> bool;

    /// Returns `true` if the calling thread is currently the one executing
    /// this runner's sequence.
    fn runs_tasks_in_current_sequence(&self) -> bool;

    /// Posts `callback` with no delay.
    fn post_task(&self, origin: Origin, callback: Callback) -> bool {
        self.post_delayed_task(origin, callback, Duration::ZERO)
    }

    /// Posts `task`, then, once it has run, posts `reply` back to whichever
    /// sequence this call was made from.
    ///
    /// Built entirely on [`TaskRunner::post_task`]. If the first post is
    /// refused, the reply is never scheduled and `false` is returned; both
    /// callbacks are destroyed.
    ///
    /// Must be called from a thread with a bound loop (the reply needs a
    /// sequence to return to).
    fn post_task_and_reply(&self, origin: Origin, task: Callback, reply: Callback) -> bool {
        let origin_runner = handle::current_sequenced();
        self.post_task(origin, relay::wrap(origin, task, reply, origin_runner))
    }
}

/// # In-order submission to a logical sequence.
pub trait SequencedTaskRunner: TaskRunner {
    /// Posts a task that will not run nested inside another task on this
    /// sequence; if a nested session is active when it comes up, it waits
    /// until the session exits.
    fn post_non_reentrant_delayed_task(
        &self,
        origin: Origin,
        callback: Callback,
        delay: Duration,
    ) -> bool;

    /// Non-reentrant post with no delay.
    fn post_non_reentrant_task(&self, origin: Origin, callback: Callback) -> bool {
        self.post_non_reentrant_delayed_task(origin, callback, Duration::ZERO)
    }
}

/// # Submission pinned to one dedicated OS thread.
pub trait PinnedTaskRunner: SequencedTaskRunner {
    /// Returns `true` if the calling thread is the runner's thread. On a
    /// thread-pinned runner this coincides with the sequence check, but the
    /// two questions are distinct capabilities.
    fn belongs_to_current_thread(&self) -> bool {
        self.runs_tasks_in_current_sequence()
    }
}

/// Closure-friendly posting helpers, available on every runner.
pub trait TaskRunnerExt: TaskRunner {
    /// Posts a closure with no delay.
    fn post<F>(&self, origin: Origin, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task(origin, Box::new(f))
    }

    /// Posts a closure to run after `delay`.
    fn post_delayed<F>(&self, origin: Origin, delay: Duration, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task(origin, Box::new(f), delay)
    }

    /// Posts `f`, then posts `reply` back to the calling sequence once `f`
    /// has run.
    fn post_with_reply<F, R>(&self, origin: Origin, f: F, reply: R) -> bool
    where
        F: FnOnce() + Send + 'static,
        R: FnOnce() + Send + 'static,
    {
        self.post_task_and_reply(origin, Box::new(f), Box::new(reply))
    }
}

impl<T: TaskRunner + ?Sized> TaskRunnerExt for T {}

/// Sequence-level helpers: non-reentrant closures and deferred-object
/// destruction.
pub trait SequencedTaskRunnerExt: SequencedTaskRunner {
    /// Posts a non-reentrant closure with no delay.
    fn post_non_reentrant<F>(&self, origin: Origin, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_non_reentrant_task(origin, Box::new(f))
    }

    /// Posts a non-reentrant task that drops `object` on the target
    /// sequence. Returns `false` (and drops it on the calling thread) if
    /// the destination has shut down.
    fn delete_soon<O>(&self, origin: Origin, object: O) -> bool
    where
        O: Send + 'static,
    {
        self.post_non_reentrant_task(origin, Box::new(move || drop(object)))
    }

    /// Posts a non-reentrant task that releases one shared reference to
    /// `object` on the target sequence.
    fn release_soon<O>(&self, origin: Origin, object: Arc<O>) -> bool
    where
        O: Send + Sync + 'static,
    {
        self.post_non_reentrant_task(origin, Box::new(move || drop(object)))
    }
}

impl<T: SequencedTaskRunner + ?Sized> SequencedTaskRunnerExt for T {}
