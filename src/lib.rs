//! # taskloop
//!
//! **taskloop** is a single-thread cooperative task-scheduling core for Rust.
//!
//! One [`TaskLoop`] binds to one OS thread and executes callbacks posted to
//! it from any thread, under strict FIFO-with-delay ordering and
//! re-entrancy rules. It supports nested execution, delayed tasks, two
//! flavors of termination (quit now, quit when idle), and observation
//! hooks. The crate is designed as a building block for components that
//! need a dedicated dispatcher thread.
//!
//! ## Architecture
//! ```text
//!  producer threads (any number)
//!    │  TaskRunner::post_task / post_delayed_task
//!    ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ IntakeQueue (cross-thread staging, one short lock)       │
//! │  - assigns sequence numbers at acceptance                │
//! │  - wakes the pump on empty → non-empty                   │
//! └──────┬───────────────────────────────────────────────────┘
//!        ▼  reload (swap under lock, on the owning thread)
//! ┌──────────────────────────────────────────────────────────┐
//! │ TaskLoop (one per thread)                                │
//! │  triage ──► run now │ move to delayed │ park on deferred │
//! │  delayed: min-order by (due_time, sequence)              │
//! │  deferred: non-reentrant tasks parked during nesting     │
//! │  observers: before/after task, destruction               │
//! └──────┬───────────────────────────────────────────────────┘
//!        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ BlockingPump (condvar wait / notify, deadline waits)     │
//! └──────────────────────────────────────────────────────────┘
//!
//! RunSession (per activation): session stack, nesting rules,
//! quit / quit-when-idle, cross-thread QuitHandle.
//! ```
//!
//! ## Capability hierarchy
//! | Capability | Trait | Adds |
//! |------------|-------|------|
//! | Post, possibly delayed | [`TaskRunner`] | `post_task`, `post_delayed_task`, `post_task_and_reply`, sequence query |
//! | In-order sequence | [`SequencedTaskRunner`] | non-reentrant posting, `delete_soon`/`release_soon` |
//! | One dedicated thread | [`PinnedTaskRunner`] | same-thread query |
//!
//! ## Example
//! ```rust
//! use taskloop::{origin, RunSession, TaskLoop, TaskRunnerExt};
//!
//! let task_loop = TaskLoop::new();
//! let runner = task_loop.task_runner();
//!
//! // Post from this thread or any other; FIFO among immediate tasks.
//! runner.post(origin!(), || println!("first"));
//! runner.post(origin!(), || println!("second"));
//!
//! // Drive the loop until no work remains.
//! RunSession::new().run_until_idle();
//! ```
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`observers::LogObserver`]
//!   _(demo/reference only)_.

mod config;
mod error;
mod loops;
mod pump;
mod queue;
mod sessions;
mod tasks;

pub mod observers;
pub mod origin;
pub mod runner;
pub mod timer;

// ---- Public re-exports ----

pub use config::LoopConfig;
pub use error::HandleError;
pub use loops::{TaskLoop, UnboundTaskLoop};
pub use origin::Origin;
pub use runner::{
    LoopTaskRunner, PinnedTaskRunner, SequencedTaskRunner, SequencedTaskRunnerExt, TaskRunner,
    TaskRunnerExt,
};
pub use sessions::{QuitHandle, RunSession, SessionKind};
pub use tasks::{Callback, Reentrancy, Task, BACKTRACE_DEPTH};
pub use timer::{OneShotTimer, RepeatingTimer};
