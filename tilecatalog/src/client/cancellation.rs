//! Cooperative cancellation primitives.
//!
//! A [`CancellationToken`] is a cancel hook handed back by every
//! asynchronous operation. A [`CancellationContext`] ties a logical request
//! to whichever operation is currently in flight on its behalf, so that
//! cancelling the request reaches the right hook even as the request moves
//! from a cache lookup to a network call.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// A cloneable cancel hook.
///
/// `cancel` runs the hook at most once, no matter how many clones exist or
/// how many threads call it concurrently.
#[derive(Clone, Default)]
pub struct CancellationToken {
    hook: Option<Arc<Mutex<Option<CancelHook>>>>,
}

impl CancellationToken {
    /// Creates a token that runs `hook` on the first `cancel` call.
    pub fn new<F>(hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            hook: Some(Arc::new(Mutex::new(Some(Box::new(hook))))),
        }
    }

    /// A token whose cancellation does nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let Some(hook) = &self.hook else {
            return;
        };
        // Take under the lock, run outside it: the hook may re-enter.
        let hook = hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

#[derive(Default)]
struct ContextState {
    cancelled: bool,
    token: CancellationToken,
}

/// Cancellation state of one logical request.
///
/// Clones share state. The lock is re-entrant so an operation started via
/// [`execute_or_cancelled`](Self::execute_or_cancelled) may itself start a
/// nested operation on the same context.
#[derive(Clone, Default)]
pub struct CancellationContext {
    state: Arc<ReentrantMutex<RefCell<ContextState>>>,
}

impl CancellationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an operation unless the context is already cancelled.
    ///
    /// If not cancelled, `start` runs under the context lock and the token
    /// it returns becomes the registered cancel hook; returns `true`.
    /// Otherwise `on_cancelled` runs, `start` never does, and the result is
    /// `false`.
    pub fn execute_or_cancelled<S, C>(&self, start: S, on_cancelled: C) -> bool
    where
        S: FnOnce() -> CancellationToken,
        C: FnOnce(),
    {
        let guard = self.state.lock();
        if guard.borrow().cancelled {
            drop(guard);
            on_cancelled();
            return false;
        }

        let token = start();
        guard.borrow_mut().token = token;
        true
    }

    /// Marks the context cancelled and fires the registered hook, if any.
    pub fn cancel(&self) {
        let guard = self.state.lock();
        let token = {
            let mut state = guard.borrow_mut();
            state.cancelled = true;
            std::mem::take(&mut state.token)
        };
        token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().borrow().cancelled
    }
}

impl fmt::Debug for CancellationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationContext")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
