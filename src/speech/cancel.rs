//! Cancellation epochs shared between producers and the worker
//!
//! Every utterance records the epoch that was current when it was queued.
//! `stop()` bumps the epoch, which cancels everything queued or in flight at
//! that moment without touching work submitted afterwards.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Epoch counter with an interruptible wait
#[derive(Debug, Default)]
pub struct StopSignal {
    epoch: Mutex<u64>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch, to be stamped onto new work
    pub fn ticket(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Cancel all work stamped with an older epoch
    pub fn cancel_all(&self) -> u64 {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.changed.notify_all();
        *epoch
    }

    /// Wake any waiter without cancelling, e.g. on shutdown
    pub fn wake(&self) {
        let _guard = self.epoch.lock();
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self, ticket: u64) -> bool {
        *self.epoch.lock() != ticket
    }

    /// Sleep for up to `timeout`, returning early on cancellation or wake
    ///
    /// Returns whether `ticket` has been cancelled.
    pub fn wait(&self, ticket: u64, timeout: Duration) -> bool {
        let mut epoch = self.epoch.lock();
        if *epoch != ticket {
            return true;
        }
        self.changed.wait_for(&mut epoch, timeout);
        *epoch != ticket
    }
}
