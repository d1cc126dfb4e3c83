//! Pause gate consulted by workers before they start a unit.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Open/closed gate built on a mutex and a condition variable.
///
/// Closing the gate makes [`wait_until_open`](Self::wait_until_open) block;
/// opening it wakes every waiter at once.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate. Returns `false` if it was already closed.
    pub fn pause(&self) -> bool {
        let mut paused = self.paused.lock();
        !std::mem::replace(&mut *paused, true)
    }

    /// Open the gate and wake all waiters. Returns `false` if it was already open.
    pub fn resume(&self) -> bool {
        let mut paused = self.paused.lock();
        let was_paused = std::mem::replace(&mut *paused, false);
        self.resumed.notify_all();
        was_paused
    }

    /// Whether the gate is closed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block until the gate is open. Returns whether the caller had to wait.
    pub fn wait_until_open(&self) -> bool {
        let mut paused = self.paused.lock();
        let waited = *paused;
        while *paused {
            self.resumed.wait(&mut paused);
        }
        waited
    }

    /// Like [`wait_until_open`](Self::wait_until_open) with an upper bound.
    /// Returns whether the gate is open.
    pub fn wait_until_open_for(&self, timeout: Duration) -> bool {
        let mut paused = self.paused.lock();
        if *paused {
            let _ = self
                .resumed
                .wait_while_for(&mut paused, |paused| *paused, timeout);
        }
        !*paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn open_gate_does_not_block() {
        let gate = PauseGate::new();
        assert!(!gate.wait_until_open());
    }

    #[test]
    fn closed_gate_blocks_until_resumed() {
        let gate = Arc::new(PauseGate::new());
        assert!(gate.pause());
        assert!(!gate.pause());

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let start = Instant::now();
                assert!(gate.wait_until_open());
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(gate.resume());
        let waited = waiter.join().unwrap();
        assert!(waited >= Duration::from_millis(90));
    }

    #[test]
    fn bounded_wait_times_out_while_closed() {
        let gate = PauseGate::new();
        gate.pause();
        assert!(!gate.wait_until_open_for(Duration::from_millis(20)));
        gate.resume();
        assert!(gate.wait_until_open_for(Duration::from_millis(20)));
    }
}
