//! Ordering oracle for total-order prepares.

use parking_lot::Mutex;

/// Hands out a global delivery sequence.
///
/// [`deliver`](Self::deliver) runs the prepare fan-out while holding the
/// sequence, so every participant receives prepares in sequence order. It
/// stands in for a real total-order broadcast.
#[derive(Debug, Default)]
pub struct TotalOrderSequencer {
    last: Mutex<u64>,
}

impl TotalOrderSequencer {
    /// Creates a sequencer starting at one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `send` with the next sequence number.
    pub fn deliver<R>(&self, send: impl FnOnce(u64) -> R) -> R {
        let mut last = self.last.lock();
        *last += 1;
        send(*last)
    }

    /// Last sequence handed out.
    pub fn last(&self) -> u64 {
        *self.last.lock()
    }
}
