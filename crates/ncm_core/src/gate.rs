//! Binary event gate
//!
//! `stop` arms the gate, asks the port to announce the teardown and then
//! waits here until the pre-teardown handler has released the DHCP lease.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct EventGate {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl EventGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    /// Wait for `signal`, consuming it. Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.cond.wait_while_for(&mut signaled, |s| !*s, timeout);
        }
        std::mem::replace(&mut *signaled, false)
    }
}
