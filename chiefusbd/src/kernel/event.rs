use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Notification event: once signalled it stays signalled and releases every
/// waiter, present and future.
pub struct Event {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.signalled.lock()
    }

    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
    }

    /// Bounded wait, true if the event was signalled before the deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.condvar.wait_for(&mut signalled, timeout).timed_out() {
                return *signalled;
            }
        }
        true
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
