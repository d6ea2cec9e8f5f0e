//! The capability hierarchy callers use to submit work.
//!
//! - [`traits`]: [`TaskRunner`] (unordered posting), [`SequencedTaskRunner`]
//!   (in-order posting plus non-reentrant submission), and
//!   [`PinnedTaskRunner`] (one dedicated OS thread), with extension traits
//!   for closure-friendly posting and deferred-object destruction.
//! - [`loop_runner`]: the concrete runner backed by a loop's intake queue.
//! - [`relay`]: the post-and-reply wrapper built on the base primitive.
//! - [`handle`]: thread-local access to the runner of the loop bound to the
//!   current thread.

pub mod handle;
pub(crate) mod loop_runner;
mod relay;
mod traits;

pub use loop_runner::LoopTaskRunner;
pub use traits::{
    PinnedTaskRunner, SequencedTaskRunner, SequencedTaskRunnerExt, TaskRunner, TaskRunnerExt,
};
