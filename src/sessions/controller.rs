//! # Per-thread session bookkeeping.
//!
//! Each OS thread may register at most one [`SessionDelegate`] for its
//! lifetime as a dispatcher; registering twice, or using run-session APIs
//! before registering, is a fatal error. The registered delegate plus the
//! stack of active sessions and the nesting observers live together in a
//! thread-local controller.
//!
//! Only the top of the session stack is live; sessions below it are
//! suspended until it pops.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::observers::NestingObserver;
use crate::sessions::run_session::SessionState;

/// What a run session asks of the loop driving its thread.
pub(crate) trait SessionDelegate {
    /// Runs the pump until quit, with or without application tasks allowed.
    fn run_loop(&self, application_tasks_allowed: bool);

    /// Stops the pump after the current callback.
    fn quit_pump(&self);

    /// Nudges the pump if application work is already pending; nested
    /// pumps need this to notice work that arrived before they started.
    fn ensure_work_scheduled(&self);
}

pub(crate) struct SessionController {
    delegate: Rc<dyn SessionDelegate>,
    stack: RefCell<Vec<Arc<SessionState>>>,
    nesting_observers: RefCell<Vec<Arc<dyn NestingObserver>>>,
}

impl SessionController {
    pub(crate) fn delegate(&self) -> &dyn SessionDelegate {
        &*self.delegate
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    pub(crate) fn push(&self, state: Arc<SessionState>) {
        self.stack.borrow_mut().push(state);
    }

    /// Pops `state`, which must be the live session, and returns the
    /// session that resumes beneath it, if any.
    pub(crate) fn pop(&self, state: &Arc<SessionState>) -> Option<Arc<SessionState>> {
        let mut stack = self.stack.borrow_mut();
        let top = stack.pop();
        match top {
            Some(top) if Arc::ptr_eq(&top, state) => stack.last().cloned(),
            _ => panic!("run session exited out of stack order"),
        }
    }

    pub(crate) fn top_is(&self, state: &Arc<SessionState>) -> bool {
        self.stack
            .borrow()
            .last()
            .is_some_and(|top| Arc::ptr_eq(top, state))
    }

    pub(crate) fn top_quit_when_idle(&self) -> bool {
        self.stack
            .borrow()
            .last()
            .is_some_and(|top| top.quit_when_idle.load(Ordering::SeqCst))
    }

    pub(crate) fn notify_begin_nested(&self) {
        let observers = self.nesting_observers.borrow().clone();
        for observer in &observers {
            observer.on_begin_nested_session();
        }
    }

    pub(crate) fn notify_exit_nested(&self) {
        let observers = self.nesting_observers.borrow().clone();
        for observer in &observers {
            observer.on_exit_nested_session();
        }
    }

    pub(crate) fn add_nesting_observer(&self, observer: Arc<dyn NestingObserver>) {
        self.nesting_observers.borrow_mut().push(observer);
    }

    pub(crate) fn remove_nesting_observer(&self, observer: &Arc<dyn NestingObserver>) {
        self.nesting_observers
            .borrow_mut()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }
}

thread_local! {
    static CONTROLLER: RefCell<Option<Rc<SessionController>>> = const { RefCell::new(None) };
}

/// Binds `delegate` as this thread's session controller. Fatal if one is
/// already registered.
pub(crate) fn register_delegate_for_current_thread(delegate: Rc<dyn SessionDelegate>) {
    CONTROLLER.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(
            slot.is_none(),
            "a run-session delegate is already registered on this thread"
        );
        *slot = Some(Rc::new(SessionController {
            delegate,
            stack: RefCell::new(Vec::new()),
            nesting_observers: RefCell::new(Vec::new()),
        }));
    });
}

pub(crate) fn unregister_delegate_for_current_thread() {
    CONTROLLER.with(|slot| {
        let controller = slot.borrow_mut().take();
        if let Some(controller) = controller {
            debug_assert_eq!(
                controller.depth(),
                0,
                "delegate unregistered with active run sessions"
            );
        }
    });
}

pub(crate) fn current() -> Option<Rc<SessionController>> {
    CONTROLLER.with(|slot| slot.borrow().clone())
}

/// Stack depth of active sessions on this thread.
pub(crate) fn active_session_depth() -> usize {
    current().map_or(0, |controller| controller.depth())
}

pub(crate) fn is_nested_on_current_thread() -> bool {
    active_session_depth() > 1
}

/// Whether the live session has asked to stop once the loop goes idle.
pub(crate) fn should_quit_when_idle() -> bool {
    current().is_some_and(|controller| controller.top_quit_when_idle())
}

/// Marks `state` as quit and, if it is the live running session on this
/// thread, stops the pump. Must run on the owning thread.
pub(crate) fn quit_session(state: &Arc<SessionState>) {
    state.quit_called.store(true, Ordering::SeqCst);
    if let Some(controller) = current() {
        if state.running.load(Ordering::SeqCst) && controller.top_is(state) {
            controller.delegate().quit_pump();
        }
    }
}
