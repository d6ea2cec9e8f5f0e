//! Task records: the unit of scheduled work and its metadata.
//!
//! - [`task`]: the [`Task`] record, its ordering for the delayed queue, and
//!   the per-thread execution trace used to capture causal backtraces.

pub mod task;

pub use task::{Callback, Reentrancy, Task, BACKTRACE_DEPTH};
