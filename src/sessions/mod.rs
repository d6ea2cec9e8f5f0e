//! Run sessions: the nesting controller for one thread's loop.
//!
//! - [`controller`]: the per-thread registration slot, the session stack,
//!   and nesting observer bookkeeping.
//! - [`run_session`]: [`RunSession`] / [`QuitHandle`], the public surface
//!   for driving and terminating a loop.

pub(crate) mod controller;
pub(crate) mod run_session;

pub use run_session::{QuitHandle, RunSession, SessionKind};
