//! The blocking primitive that drives one thread's loop.
//!
//! - [`blocking`]: [`BlockingPump`] and the [`PumpDelegate`] contract.

pub(crate) mod blocking;

pub(crate) use blocking::{BlockingPump, PumpDelegate};
