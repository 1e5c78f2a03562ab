//! Sleeping between control steps

use std::time::Duration;

/// Source of the control loop's waits.
pub trait Timer {
    fn sleep(&mut self, duration: Duration);
}

/// Timer sleeping the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration)
    }
}
