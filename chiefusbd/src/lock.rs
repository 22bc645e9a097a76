//! Reference-counted device lock.
//!
//! One counter answers two questions at once: how many openers and in-flight
//! transfers still reference the device, and whether teardown may proceed.
//! The count starts at 1 when the device is added (the structural
//! reference), so the drain event can only fire once final removal has
//! released it.

use spin::Mutex as SpinMutex;

use crate::kernel::Event;

struct LockState {
    count: i32,
    device_removed: bool,
    remove_pending: bool,
    hold_new_requests: bool,
    /// Open handles per pipe; the allocation bit for a pipe is set exactly
    /// while its entry is nonzero.
    pipe_handles: Vec<u32>,
}

/// Counter, admission flags and pipe bitmap, all guarded by one spinlock,
/// paired with the notification event signalled when the count drains to
/// zero.
pub struct DeviceLock {
    state: SpinMutex<LockState>,
    drained: Event,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self {
            state: SpinMutex::new(LockState {
                count: 0,
                device_removed: false,
                remove_pending: false,
                hold_new_requests: false,
                pipe_handles: Vec::new(),
            }),
            drained: Event::new(),
        }
    }

    pub fn increment(&self) -> i32 {
        let mut state = self.state.lock();
        state.count += 1;
        state.count
    }

    /// Decrement without signalling, even at zero.
    pub fn decrement(&self) -> i32 {
        let mut state = self.state.lock();
        state.count -= 1;
        state.count
    }

    /// Decrement and, on the transition to zero, signal the drain event
    /// before the lock is released.
    pub fn decrement_and_notify(&self) -> i32 {
        let state = &mut *self.state.lock();
        state.count -= 1;
        if state.count == 0 {
            self.drained.set();
        }
        state.count
    }

    /// Block until the count has drained to zero.
    pub fn drain(&self) {
        self.drained.wait();
    }

    /// Advisory snapshot; only the drain event is a correctness barrier.
    pub fn count(&self) -> i32 {
        self.state.lock().count
    }

    pub fn set_removed(&self) {
        self.state.lock().device_removed = true;
    }

    pub fn removed(&self) -> bool {
        self.state.lock().device_removed
    }

    pub fn set_remove_pending(&self, pending: bool) {
        self.state.lock().remove_pending = pending;
    }

    pub fn remove_pending(&self) -> bool {
        self.state.lock().remove_pending
    }

    pub fn set_hold_new_requests(&self, hold: bool) {
        self.state.lock().hold_new_requests = hold;
    }

    pub fn hold_new_requests(&self) -> bool {
        self.state.lock().hold_new_requests
    }

    /// True when any admission flag blocks new requests.
    pub fn blocked(&self) -> bool {
        let state = self.state.lock();
        state.device_removed || state.remove_pending || state.hold_new_requests
    }

    /// Replace the pipe bitmap with a cleared one sized for the new
    /// interface.
    pub fn resize_pipes(&self, count: usize) {
        self.state.lock().pipe_handles = vec![0; count];
    }

    /// Record one more open handle on pipe `index`, setting its allocation
    /// bit. Every claimed handle carries its own reference on the count.
    pub fn claim_pipe(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        match state.pipe_handles.get_mut(index) {
            Some(slot) => {
                *slot += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one handle's share of pipe `index`, clearing the allocation bit
    /// with the last one. False when the teardown abort already revoked the
    /// share, so the caller drops no reference twice.
    pub fn release_pipe(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        match state.pipe_handles.get_mut(index) {
            Some(slot) if *slot > 0 => {
                *slot -= 1;
                true
            }
            _ => false,
        }
    }

    /// Clear the allocation bit for pipe `index` outright, returning how
    /// many handle shares were outstanding. Used by the pipe abort during
    /// teardown, which releases the references of every revoked share.
    pub fn revoke_pipe(&self, index: usize) -> u32 {
        let mut state = self.state.lock();
        match state.pipe_handles.get_mut(index) {
            Some(slot) => std::mem::take(slot),
            None => 0,
        }
    }

    pub fn pipe_claimed(&self, index: usize) -> bool {
        self.state
            .lock()
            .pipe_handles
            .get(index)
            .map(|slot| *slot > 0)
            .unwrap_or(false)
    }

    pub fn allocated_pipes(&self) -> Vec<bool> {
        self.state
            .lock()
            .pipe_handles
            .iter()
            .map(|slot| *slot > 0)
            .collect()
    }
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}
