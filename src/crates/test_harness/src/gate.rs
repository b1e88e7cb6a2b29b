use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// One-shot latch used to synchronize the controlling thread with a lifecycle
/// milestone of the managed service.
///
/// Once signaled the gate stays open; further signals have no effect.
#[derive(Debug, Default)]
pub struct LifecycleGate {
    signaled: Mutex<bool>,
    opened: Condvar,
}

impl LifecycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate and wake every waiter.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        if !*signaled {
            *signaled = true;
            self.opened.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the gate is open or `timeout` elapses.
    ///
    /// Returns `true` immediately if the gate was already open.
    pub fn wait(&self, timeout: Duration) -> bool {
        let signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        let (signaled, _) = self
            .opened
            .wait_timeout_while(signaled, timeout, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
        *signaled
    }
}
