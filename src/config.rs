//! # Loop configuration.
//!
//! [`LoopConfig`] defines the tunable behavior of a [`TaskLoop`](crate::TaskLoop):
//! the pump wake policy for cross-thread submissions and the retry ceiling
//! for the teardown drain.
//!
//! # Example
//! ```
//! use taskloop::LoopConfig;
//!
//! let mut cfg = LoopConfig::default();
//! cfg.always_wake_on_post = true;
//!
//! assert_eq!(cfg.drain_retries, 100);
//! ```

/// Configuration for a single task loop.
#[derive(Clone, Copy, Debug)]
pub struct LoopConfig {
    /// Wake the pump on every accepted submission instead of only on the
    /// staging queue's empty-to-non-empty transition.
    ///
    /// Both policies satisfy the loop's ordering guarantees; the default
    /// coalesces wakeups on a busy loop.
    pub always_wake_on_post: bool,
    /// How many times teardown will clear the pending queues before treating
    /// a task that keeps re-spawning cleanup work as fatal.
    pub drain_retries: usize,
}

impl Default for LoopConfig {
    /// Returns a configuration with:
    /// - `always_wake_on_post = false` (wake on empty-to-non-empty only);
    /// - `drain_retries = 100`.
    fn default() -> Self {
        Self {
            always_wake_on_post: false,
            drain_retries: 100,
        }
    }
}
