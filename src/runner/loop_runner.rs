//! # The loop-backed task runner.
//!
//! [`LoopTaskRunner`] is the concrete runner handed out by a task loop. It
//! holds a shared reference to the loop's intake queue, so producers can
//! outlive the loop itself: once the loop disconnects the queue, every
//! post simply returns `false`.
//!
//! The runner is created before the loop binds; the thread identity used
//! by the sequence check is filled in at bind time.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::origin::Origin;
use crate::queue::IntakeQueue;
use crate::runner::{PinnedTaskRunner, SequencedTaskRunner, TaskRunner};
use crate::tasks::{Callback, Reentrancy};

/// Runner for one task loop. Clone the `Arc` freely across threads.
pub struct LoopTaskRunner {
    queue: Arc<IntakeQueue>,
    bound_thread: Mutex<Option<ThreadId>>,
}

impl LoopTaskRunner {
    pub(crate) fn new(queue: Arc<IntakeQueue>) -> Self {
        LoopTaskRunner {
            queue,
            bound_thread: Mutex::new(None),
        }
    }

    /// Records the owning thread. Called exactly once, from the loop's
    /// bind; binding twice is a programming error.
    pub(crate) fn bind_to_current_thread(&self) {
        let mut bound = self.bound_thread.lock();
        assert!(bound.is_none(), "task runner is already bound to a thread");
        *bound = Some(thread::current().id());
    }
}

impl TaskRunner for LoopTaskRunner {
    fn post_delayed_task(&self, origin: Origin, callback: Callback, delay: Duration) -> bool {
        self.queue
            .post_task(origin, callback, delay, Reentrancy::Reentrant)
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        *self.bound_thread.lock() == Some(thread::current().id())
    }
}

impl SequencedTaskRunner for LoopTaskRunner {
    fn post_non_reentrant_delayed_task(
        &self,
        origin: Origin,
        callback: Callback,
        delay: Duration,
    ) -> bool {
        self.queue
            .post_task(origin, callback, delay, Reentrancy::NonReentrant)
    }
}

impl PinnedTaskRunner for LoopTaskRunner {}
