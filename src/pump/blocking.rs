//! # The blocking pump.
//!
//! [`BlockingPump`] sleeps the owning thread until there is work, a delayed
//! deadline elapses, or it is told to stop. It is the only component that
//! blocks; everything else is short-critical-section bookkeeping.
//!
//! ## Contract
//! - [`BlockingPump::run`] calls the delegate in a fixed order each
//!   iteration: immediate work, delayed work (exchanging the next known
//!   deadline), then idle work only if neither produced work. If nothing
//!   produced work it blocks: indefinitely without a deadline, otherwise
//!   until the deadline, recomputed against the current time.
//! - [`BlockingPump::schedule_work`] is safe from any thread and wakes the
//!   pump at most once per call; wakeups coalesce.
//! - [`BlockingPump::schedule_delayed_work`] only updates the deadline used
//!   for the next block; it never wakes the pump.
//! - [`BlockingPump::quit`] is idempotent and exits the run loop as soon as
//!   the current delegate callback returns. Nested runs save and restore
//!   the running flag so an inner quit does not stop the outer run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// The three scheduling callbacks a pump drives.
pub(crate) trait PumpDelegate {
    /// Does one batch of immediate work. Returns `true` if a task ran.
    fn do_immediate_work(&self) -> bool;

    /// Does one unit of delayed work. `next_due` carries the pump's current
    /// deadline in and the delegate's updated deadline out.
    fn do_delayed_work(&self, next_due: &mut Option<Instant>) -> bool;

    /// Does one unit of idle work. Returns `true` if anything ran.
    fn do_idle_work(&self) -> bool;
}

#[derive(Default)]
struct PumpState {
    /// A wakeup arrived while the pump was not looking. Consumed by the
    /// block step so multiple wakeups collapse into one.
    wakeup_pending: bool,
    delayed_work_time: Option<Instant>,
}

/// Condvar-backed wait/notify primitive for one dispatcher thread.
pub(crate) struct BlockingPump {
    state: Mutex<PumpState>,
    wakeup: Condvar,
    keep_running: AtomicBool,
}

impl BlockingPump {
    pub(crate) fn new() -> Self {
        BlockingPump {
            state: Mutex::new(PumpState::default()),
            wakeup: Condvar::new(),
            keep_running: AtomicBool::new(true),
        }
    }

    /// Drives `delegate` until [`BlockingPump::quit`] is called. Re-entrant:
    /// a nested call runs its own loop and restores the outer one's state
    /// on exit.
    pub(crate) fn run(&self, delegate: &dyn PumpDelegate) {
        let was_running = self.keep_running.swap(true, Ordering::SeqCst);

        loop {
            let mut did_work = delegate.do_immediate_work();
            if !self.keep_running.load(Ordering::SeqCst) {
                break;
            }

            let mut next_due = self.state.lock().delayed_work_time;
            did_work |= delegate.do_delayed_work(&mut next_due);
            self.state.lock().delayed_work_time = next_due;
            if !self.keep_running.load(Ordering::SeqCst) {
                break;
            }

            if did_work {
                continue;
            }

            did_work = delegate.do_idle_work();
            if !self.keep_running.load(Ordering::SeqCst) {
                break;
            }
            if did_work {
                continue;
            }

            let mut state = self.state.lock();
            if state.wakeup_pending {
                state.wakeup_pending = false;
                continue;
            }
            match state.delayed_work_time {
                None => {
                    self.wakeup.wait(&mut state);
                }
                Some(due) => {
                    // Recompute against the current time, never a stale
                    // snapshot.
                    if due <= Instant::now() {
                        continue;
                    }
                    let _ = self.wakeup.wait_until(&mut state, due);
                }
            }
            state.wakeup_pending = false;
        }

        self.keep_running.store(was_running, Ordering::SeqCst);
    }

    /// Stops the innermost active run after the current delegate call.
    pub(crate) fn quit(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    /// Wakes the pump. Callable from any thread.
    pub(crate) fn schedule_work(&self) {
        let mut state = self.state.lock();
        state.wakeup_pending = true;
        self.wakeup.notify_one();
    }

    /// Sets the deadline the pump uses when it next blocks. Owner thread
    /// only; does not wake the pump.
    pub(crate) fn schedule_delayed_work(&self, due: Instant) {
        self.state.lock().delayed_work_time = Some(due);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    /// Delegate that quits its pump after a fixed number of immediate-work
    /// rounds, reporting work on each round until then.
    struct CountdownDelegate {
        pump: Arc<BlockingPump>,
        rounds_left: Cell<u32>,
        rounds_seen: Cell<u32>,
    }

    impl PumpDelegate for CountdownDelegate {
        fn do_immediate_work(&self) -> bool {
            self.rounds_seen.set(self.rounds_seen.get() + 1);
            let left = self.rounds_left.get();
            if left == 0 {
                self.pump.quit();
                return false;
            }
            self.rounds_left.set(left - 1);
            true
        }

        fn do_delayed_work(&self, next_due: &mut Option<Instant>) -> bool {
            *next_due = None;
            false
        }

        fn do_idle_work(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_run_polls_until_quit() {
        let pump = Arc::new(BlockingPump::new());
        let delegate = CountdownDelegate {
            pump: pump.clone(),
            rounds_left: Cell::new(3),
            rounds_seen: Cell::new(0),
        };
        pump.run(&delegate);
        assert_eq!(delegate.rounds_seen.get(), 4);
    }

    /// Delegate with no work at all; the pump must block until an external
    /// wake plus quit arrives.
    struct IdleDelegate {
        polls: Cell<u32>,
    }

    impl PumpDelegate for IdleDelegate {
        fn do_immediate_work(&self) -> bool {
            self.polls.set(self.polls.get() + 1);
            false
        }
        fn do_delayed_work(&self, next_due: &mut Option<Instant>) -> bool {
            *next_due = None;
            false
        }
        fn do_idle_work(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_schedule_work_wakes_blocked_pump() {
        let pump = Arc::new(BlockingPump::new());
        let waker = pump.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            waker.quit();
            waker.schedule_work();
        });

        let delegate = IdleDelegate { polls: Cell::new(0) };
        let start = Instant::now();
        pump.run(&delegate);
        handle.join().unwrap();

        assert!(
            start.elapsed() >= Duration::from_millis(25),
            "pump returned before it was woken"
        );
        assert!(delegate.polls.get() >= 1);
    }

    /// Delegate that reports a deadline on the first round and quits once
    /// the deadline has passed.
    struct DeadlineDelegate {
        pump: Arc<BlockingPump>,
        due: Instant,
    }

    impl PumpDelegate for DeadlineDelegate {
        fn do_immediate_work(&self) -> bool {
            false
        }
        fn do_delayed_work(&self, next_due: &mut Option<Instant>) -> bool {
            if Instant::now() >= self.due {
                self.pump.quit();
            } else {
                *next_due = Some(self.due);
            }
            false
        }
        fn do_idle_work(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_blocks_until_delayed_deadline() {
        let pump = Arc::new(BlockingPump::new());
        let start = Instant::now();
        let delegate = DeadlineDelegate {
            pump: pump.clone(),
            due: start + Duration::from_millis(40),
        };
        pump.run(&delegate);
        assert!(
            start.elapsed() >= Duration::from_millis(40),
            "pump woke before the deadline: {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn test_wakeups_coalesce() {
        let pump = Arc::new(BlockingPump::new());
        pump.schedule_work();
        pump.schedule_work();
        pump.schedule_work();

        // A single pending wakeup is consumed by the first block attempt;
        // the second one must block until the external wake.
        let waker = pump.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            waker.quit();
            waker.schedule_work();
        });

        let delegate = IdleDelegate { polls: Cell::new(0) };
        let start = Instant::now();
        pump.run(&delegate);
        handle.join().unwrap();

        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
