//! The thread-safe intake pipeline between producer threads and the
//! owning loop.
//!
//! - [`intake`]: [`IntakeQueue`], the cross-thread staging list plus the
//!   shutdown and pump-wake plumbing.
//! - [`work_set`]: the owner-side triage / delayed / deferred sub-queues.

pub(crate) mod intake;
pub(crate) mod work_set;

pub(crate) use intake::IntakeQueue;
