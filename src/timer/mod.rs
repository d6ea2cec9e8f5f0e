//! # Timers built on the posting primitive.
//!
//! [`OneShotTimer`] fires its callback once after a delay; [`RepeatingTimer`]
//! fires it at a fixed interval until stopped. Both post ordinary delayed
//! tasks to a sequenced runner (the current thread's by default) and use a
//! generation counter to abandon control tasks that a stop or restart has
//! made stale, so a stale task left in the delayed queue runs nothing.
//!
//! Timers are sequence-affine: start and stop them on the sequence they
//! fire on.
//!
//! ## Example
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskloop::{origin, OneShotTimer, RunSession, TaskLoop};
//!
//! let task_loop = TaskLoop::new();
//! let fired = Arc::new(AtomicBool::new(false));
//!
//! let mut timer = OneShotTimer::new();
//! let flag = fired.clone();
//! timer.start(origin!(), Duration::from_millis(10), move || {
//!     flag.store(true, Ordering::SeqCst);
//! });
//!
//! std::thread::sleep(Duration::from_millis(20));
//! RunSession::new().run_until_idle();
//! assert!(fired.load(Ordering::SeqCst));
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::origin::Origin;
use crate::runner::{handle, SequencedTaskRunner, TaskRunner};

/// State shared between a timer and its in-flight control tasks. The
/// generation identifies the newest schedule; control tasks carrying an
/// older generation have been abandoned.
struct TimerShared {
    generation: AtomicU64,
    running: AtomicBool,
}

impl TimerShared {
    fn new() -> Arc<Self> {
        Arc::new(TimerShared {
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Invalidates every outstanding control task and returns the new
    /// generation.
    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

fn runner_or_current(
    explicit: &Option<Arc<dyn SequencedTaskRunner>>,
) -> Arc<dyn SequencedTaskRunner> {
    match explicit {
        Some(runner) => runner.clone(),
        None => handle::current_sequenced(),
    }
}

/// Fires a callback once, `delay` after [`OneShotTimer::start`].
///
/// Restarting re-arms the timer with the new callback; stopping or
/// dropping it before the deadline means the callback never runs and is
/// destroyed.
pub struct OneShotTimer {
    shared: Arc<TimerShared>,
    runner: Option<Arc<dyn SequencedTaskRunner>>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        OneShotTimer {
            shared: TimerShared::new(),
            runner: None,
        }
    }

    /// Overrides the runner the control task is posted to. Must be called
    /// while the timer is not running.
    pub fn set_task_runner(&mut self, runner: Arc<dyn SequencedTaskRunner>) {
        assert!(
            !self.is_running(),
            "timer task runner changed while running"
        );
        self.runner = Some(runner);
    }

    /// Arms the timer. Returns `false` if the destination refused the
    /// control task (its loop has shut down).
    pub fn start<F>(&mut self, origin: Origin, delay: Duration, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.shared.advance();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let accepted = runner_or_current(&self.runner).post_delayed_task(
            origin,
            Box::new(move || {
                if shared.is_current(generation) {
                    shared.running.store(false, Ordering::SeqCst);
                    callback();
                }
            }),
            delay,
        );
        if !accepted {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        accepted
    }

    /// Disarms the timer; a pending control task becomes a no-op.
    pub fn stop(&mut self) {
        self.shared.advance();
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Whether the timer is armed and has not fired yet.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Default for OneShotTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything a repeating control task needs to fire and re-arm itself.
struct RepeatState {
    shared: Arc<TimerShared>,
    runner: Arc<dyn SequencedTaskRunner>,
    origin: Origin,
    delay: Duration,
    callback: Mutex<Box<dyn FnMut() + Send>>,
}

fn schedule_repeat(state: &Arc<RepeatState>, generation: u64) -> bool {
    let next = state.clone();
    state.runner.post_delayed_task(
        state.origin,
        Box::new(move || {
            if !next.shared.is_current(generation) {
                return;
            }
            {
                let mut callback = next.callback.lock();
                (*callback)();
            }
            // The callback may have stopped or restarted the timer.
            if next.shared.is_current(generation) {
                schedule_repeat(&next, generation);
            }
        }),
        state.delay,
    )
}

/// Fires a callback every `delay` until stopped or dropped.
pub struct RepeatingTimer {
    shared: Arc<TimerShared>,
    runner: Option<Arc<dyn SequencedTaskRunner>>,
}

impl RepeatingTimer {
    pub fn new() -> Self {
        RepeatingTimer {
            shared: TimerShared::new(),
            runner: None,
        }
    }

    /// Overrides the runner the control tasks are posted to. Must be
    /// called while the timer is not running.
    pub fn set_task_runner(&mut self, runner: Arc<dyn SequencedTaskRunner>) {
        assert!(
            !self.is_running(),
            "timer task runner changed while running"
        );
        self.runner = Some(runner);
    }

    /// Arms the timer. Returns `false` if the destination refused the
    /// first control task.
    pub fn start<F>(&mut self, origin: Origin, delay: Duration, callback: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        let generation = self.shared.advance();
        self.shared.running.store(true, Ordering::SeqCst);

        let state = Arc::new(RepeatState {
            shared: self.shared.clone(),
            runner: runner_or_current(&self.runner),
            origin,
            delay,
            callback: Mutex::new(Box::new(callback)),
        });
        let accepted = schedule_repeat(&state, generation);
        if !accepted {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        accepted
    }

    /// Stops firing; pending control tasks become no-ops.
    pub fn stop(&mut self) {
        self.shared.advance();
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Default for RepeatingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crate::sessions::RunSession;
    use crate::TaskLoop;

    #[test]
    fn test_one_shot_fires_exactly_once() {
        let _task_loop = TaskLoop::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let mut timer = OneShotTimer::new();
        let counter = fired.clone();
        assert!(timer.start(crate::origin!(), Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(timer.is_running());

        thread::sleep(Duration::from_millis(20));
        RunSession::new().run_until_idle();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());

        thread::sleep(Duration::from_millis(20));
        RunSession::new().run_until_idle();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_shot_stop_prevents_firing() {
        let _task_loop = TaskLoop::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let mut timer = OneShotTimer::new();
        let counter = fired.clone();
        timer.start(crate::origin!(), Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.stop();
        assert!(!timer.is_running());

        thread::sleep(Duration::from_millis(20));
        RunSession::new().run_until_idle();
        assert_eq!(fired.load(Ordering::SeqCst), 0, "stopped timer still fired");
    }

    #[test]
    fn test_one_shot_restart_supersedes_previous_schedule() {
        let _task_loop = TaskLoop::new();
        let log: Arc<parking_lot::Mutex<Vec<&'static str>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut timer = OneShotTimer::new();
        let first = log.clone();
        timer.start(crate::origin!(), Duration::from_millis(10), move || {
            first.lock().push("first");
        });
        let second = log.clone();
        timer.start(crate::origin!(), Duration::from_millis(10), move || {
            second.lock().push("second");
        });

        thread::sleep(Duration::from_millis(20));
        RunSession::new().run_until_idle();
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn test_repeating_timer_fires_until_stopped() {
        let _task_loop = TaskLoop::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let mut timer = RepeatingTimer::new();
        let counter = fired.clone();
        assert!(timer.start(crate::origin!(), Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Three passes, each long enough for at least one interval.
        for _ in 0..3 {
            thread::sleep(Duration::from_millis(10));
            RunSession::new().run_until_idle();
        }
        let fired_while_running = fired.load(Ordering::SeqCst);
        assert!(
            fired_while_running >= 2,
            "repeating timer fired only {fired_while_running} times"
        );

        timer.stop();
        thread::sleep(Duration::from_millis(10));
        RunSession::new().run_until_idle();
        assert_eq!(fired.load(Ordering::SeqCst), fired_while_running);
    }

    #[test]
    fn test_start_fails_when_destination_is_gone() {
        let _task_loop = TaskLoop::new();

        let (send_runner, recv_runner) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let dead_loop = TaskLoop::new();
            send_runner
                .send(crate::runner::handle::current_sequenced())
                .unwrap();
            drop(dead_loop);
        })
        .join()
        .unwrap();
        let dead_runner = recv_runner.recv().unwrap();

        let mut timer = OneShotTimer::new();
        timer.set_task_runner(dead_runner);
        let accepted = timer.start(crate::origin!(), Duration::from_millis(1), || {});
        assert!(!accepted);
        assert!(!timer.is_running());
    }
}
