//! Error types used by the taskloop runtime.
//!
//! Expected runtime rejections (posting to a loop that has shut down,
//! a reply whose first post failed) are reported through `bool` results on
//! the posting APIs; `false` means the callback was destroyed without
//! running. The error type below covers the recoverable lookup failures
//! that have a useful "not set" state.

use thiserror::Error;

/// # Errors produced by thread-local handle lookups.
///
/// Returned by the `try_` variants of the current-runner accessors in
/// [`runner::handle`](crate::runner::handle).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandleError {
    /// No task loop has been bound on the calling thread.
    #[error("no task runner is bound to the current thread")]
    NotSet,
}

impl HandleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskloop::HandleError;
    ///
    /// assert_eq!(HandleError::NotSet.as_label(), "handle_not_set");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HandleError::NotSet => "handle_not_set",
        }
    }
}
