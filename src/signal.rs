use std::sync::{Condvar, Mutex};

/// One-shot completion signal for control-plane barriers.
///
/// The control thread submits an entry that rings this, then blocks until
/// the I/O thread has executed it. One signal serves one barrier;
/// `stop_logging`/`stop_tracing` allocate a fresh one per call. Blocking
/// is fine here — barriers are control-plane by definition, never on a
/// producer's hot path.
pub(crate) struct FlushSignal {
    done: Mutex<bool>,
    cv: Condvar,
}

impl FlushSignal {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Blocks until the barrier entry has executed on the I/O thread.
    pub(crate) fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
    }

    /// Rung by the barrier entry itself; wakes the waiting control thread.
    pub(crate) fn notify(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cv.notify_all();
    }
}
