//! One-shot signal used by synchronous wrappers around callback APIs.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A boolean signal paired with a condition variable.
///
/// `notify` latches the signal so a waiter that arrives late still observes
/// it. `wait` consumes the signal.
#[derive(Debug, Default)]
pub struct Condition {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes every waiter.
    pub fn notify(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    /// Blocks until notified or until `timeout` elapses.
    ///
    /// Returns `true` if the signal was observed. The signal is reset before
    /// returning.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        if !*signalled {
            self.condvar
                .wait_while_for(&mut signalled, |set| !*set, timeout);
        }
        std::mem::replace(&mut *signalled, false)
    }
}
