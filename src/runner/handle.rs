//! # Current-thread runner handles.
//!
//! When a loop binds to a thread, its runner is published in a
//! thread-local slot so code running on that thread can post back to its
//! own sequence without threading a runner reference through every call.
//!
//! ## Example
//! ```rust
//! use taskloop::{runner, PinnedTaskRunner, TaskLoop};
//!
//! assert!(!runner::handle::is_set());
//! let task_loop = TaskLoop::new();
//! let current = runner::handle::current();
//! assert!(current.belongs_to_current_thread());
//! # drop(task_loop);
//! ```

use std::cell::RefCell;
use std::sync::Arc;

use crate::error::HandleError;
use crate::runner::loop_runner::LoopTaskRunner;
use crate::runner::{PinnedTaskRunner, SequencedTaskRunner};

thread_local! {
    static CURRENT_RUNNER: RefCell<Option<Arc<LoopTaskRunner>>> = const { RefCell::new(None) };
}

/// Installs the bound loop's runner. Fatal if a runner is already set.
pub(crate) fn bind(runner: Arc<LoopTaskRunner>) {
    CURRENT_RUNNER.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(
            slot.is_none(),
            "a task runner is already bound to this thread"
        );
        *slot = Some(runner);
    });
}

pub(crate) fn clear() {
    CURRENT_RUNNER.with(|slot| slot.borrow_mut().take());
}

/// The thread-pinned runner of the loop bound to the current thread.
///
/// Panics if no loop is bound; use [`try_current`] to probe.
pub fn current() -> Arc<dyn PinnedTaskRunner> {
    match try_current() {
        Ok(runner) => runner,
        Err(_) => panic!("no task runner is bound to the current thread"),
    }
}

/// Like [`current`], but recoverable.
pub fn try_current() -> Result<Arc<dyn PinnedTaskRunner>, HandleError> {
    CURRENT_RUNNER.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|runner| runner.clone() as Arc<dyn PinnedTaskRunner>)
            .ok_or(HandleError::NotSet)
    })
}

/// The current thread's runner viewed as a sequenced runner. Panics if no
/// loop is bound.
pub fn current_sequenced() -> Arc<dyn SequencedTaskRunner> {
    match try_current_sequenced() {
        Ok(runner) => runner,
        Err(_) => panic!("no task runner is bound to the current thread"),
    }
}

/// Like [`current_sequenced`], but recoverable.
pub fn try_current_sequenced() -> Result<Arc<dyn SequencedTaskRunner>, HandleError> {
    CURRENT_RUNNER.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|runner| runner.clone() as Arc<dyn SequencedTaskRunner>)
            .ok_or(HandleError::NotSet)
    })
}

/// Whether a loop is bound to the current thread.
pub fn is_set() -> bool {
    CURRENT_RUNNER.with(|slot| slot.borrow().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_current_reports_not_set() {
        // Tests run on their own threads; nothing has bound a loop here.
        let err = try_current().err().expect("no runner should be bound");
        assert_eq!(err.as_label(), "handle_not_set");
        assert!(!is_set());
    }
}
