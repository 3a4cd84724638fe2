//! The single consumer: one loop iteration per poll period (or early wake
//! on shutdown), phased exactly as: wait, gather, swap, drain, flush,
//! retire orphans.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::logger::Logger;
use crate::queue::TlsQueue;
use crate::ring::GatherState;

/// Consumer-private state: the ring gather cursor plus the working lists.
/// It outlives any single run of the I/O thread — the logger parks it
/// between runs, so a stop/start cycle resumes with the same cursor and
/// the same deferred work instead of rewinding the ring.
///
/// The queue pointers held here are kept alive by the registry/orphanage
/// (see `registry` module docs).
pub(crate) struct IoState {
    /// Scratch list reused across iterations.
    to_swap: Vec<*const TlsQueue>,
    /// Queues that requested a swap while their previous swap was still
    /// being drained. Swapping them again now would clobber unread entries.
    to_swap_deferred: Vec<*const TlsQueue>,
    /// Queues swapped and ready to drain.
    to_read: Vec<*const TlsQueue>,
    gather: GatherState,
}

// SAFETY: the raw queue pointers are only dereferenced by IoThread::run on
// whichever single thread currently owns the state, and the registry
// keep-alive invariant keeps their referents allocated.
unsafe impl Send for IoState {}

impl IoState {
    pub(crate) fn new() -> Self {
        Self {
            to_swap: Vec::new(),
            to_swap_deferred: Vec::new(),
            to_read: Vec::new(),
            gather: GatherState::new(),
        }
    }
}

/// One run of the consumer loop. Exactly one exists at a time (the logger
/// hands out the parked [`IoState`] only to the thread it spawns), which is
/// the single-consumer property the queue protocol requires.
pub(crate) struct IoThread {
    logger: Arc<Logger>,
    state: IoState,
}

impl IoThread {
    pub(crate) fn new(logger: Arc<Logger>, state: IoState) -> Self {
        Self { logger, state }
    }

    pub(crate) fn run(mut self) {
        while self.logger.io_alive() {
            self.wait();
            self.gather_and_swap();
            self.process();
            self.logger.async_log.lock().unwrap().flush();
            self.logger.registry.retire_marked();
        }

        // Park the consumer state so a later start resumes where this run
        // left off.
        let IoThread { logger, state } = self;
        *logger.io_state.lock().unwrap() = Some(state);
    }

    /// Sleeps for one poll period, waking early when shutdown is requested.
    /// Producers never notify; they must not touch a condvar on the hot
    /// path.
    fn wait(&self) {
        let keep_alive = self.logger.keep_alive.lock().unwrap();
        let _ = self
            .logger
            .wake
            .wait_timeout_while(keep_alive, self.logger.poll_period, |alive| *alive)
            .unwrap();
    }

    /// Collects swap requests (deferred ones from the previous tick first),
    /// swaps every queue whose previous swap is fully drained, and defers
    /// the rest.
    fn gather_and_swap(&mut self) {
        let mut to_swap = mem::take(&mut self.state.to_swap);
        to_swap.append(&mut self.state.to_swap_deferred);
        self.state
            .gather
            .gather(&self.logger.ring, &self.logger.stats, &mut to_swap);

        for &ptr in &to_swap {
            // SAFETY: keep-alive invariant, and this is the single consumer.
            let queue = unsafe { &*ptr };
            unsafe {
                if queue.read_buffer_consumed() {
                    queue.swap_buffers();
                    self.state.to_read.push(ptr);
                } else {
                    self.state.to_swap_deferred.push(ptr);
                }
            }
        }

        to_swap.clear();
        self.state.to_swap = to_swap;
    }

    /// Drains every readable queue: publish its attribution to the sink,
    /// execute its entries in submission order, release the batch. A queue
    /// whose producer is mid-append stays in the list for the next tick.
    fn process(&mut self) {
        if self.state.to_read.is_empty() {
            return;
        }
        let logger = &self.logger;
        let mut log = logger.async_log.lock().unwrap();
        self.state.to_read.retain(|&ptr| {
            // SAFETY: as in gather_and_swap.
            let queue = unsafe { &*ptr };
            match unsafe { queue.start_reading() } {
                Some(mut batch) => {
                    log.set_current_pid_tid(queue.pid_tid());
                    for entry in batch.drain() {
                        entry(&mut log);
                    }
                    false
                }
                None => {
                    logger
                        .stats
                        .start_reading_retry
                        .fetch_add(1, Ordering::Relaxed);
                    true
                }
            }
        });
    }
}
