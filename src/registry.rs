//! Registry and orphanage: who is logging, and who has already left.
//!
//! Live queues are registered so their contention counters can be swept.
//! When a producer thread exits, ownership of its queue moves into the
//! orphanage *before* it leaves the registered set (no coverage gap) and a
//! sentinel entry is submitted through the queue itself; once the I/O
//! thread executes that sentinel, everything before it has been delivered
//! and the orphan is marked for destruction. The I/O thread erases marked
//! orphans at the end of its iteration. This is what keeps every queue
//! pointer in the ring alive: a pointer announced there always belongs to a
//! queue whose `Arc` is still held here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LogError;
use crate::queue::TlsQueue;

/// Aggregated contention counters, written from the I/O thread (gather and
/// drain phases, orphan sentinels) and reported by `stop_logging`. All
/// relaxed; these are observational only.
pub(crate) struct ContentionStats {
    /// Gather found a slot whose producer was mid-request.
    pub(crate) slot_retry: AtomicUsize,
    /// A retried slot was still mid-request on a later tick.
    pub(crate) slot_retry_retry: AtomicUsize,
    /// A retried slot's turn came around again before it resolved.
    pub(crate) slot_reencounter: AtomicUsize,
    /// `start_reading` lost the race with a producer mid-append.
    pub(crate) start_reading_retry: AtomicUsize,
    /// Producer buffer CAS failures, summed over retired queues.
    pub(crate) queue_cas_fail: AtomicUsize,
    /// Producer ring-slot retries, summed over retired queues.
    pub(crate) queue_slot_retry: AtomicUsize,
}

impl ContentionStats {
    pub(crate) fn new() -> Self {
        Self {
            slot_retry: AtomicUsize::new(0),
            slot_retry_retry: AtomicUsize::new(0),
            slot_reencounter: AtomicUsize::new(0),
            start_reading_retry: AtomicUsize::new(0),
            queue_cas_fail: AtomicUsize::new(0),
            queue_slot_retry: AtomicUsize::new(0),
        }
    }

    /// Drains one queue's counters into the totals.
    pub(crate) fn collect_from(&self, queue: &TlsQueue) {
        self.queue_cas_fail
            .fetch_add(queue.report_cas_fails(), Ordering::Relaxed);
        self.queue_slot_retry
            .fetch_add(queue.report_slot_retries(), Ordering::Relaxed);
    }
}

/// Membership bookkeeping for live and orphaned queues. None of this is on
/// the hot path; plain mutexes are fine.
pub(crate) struct Registry {
    registered: Mutex<Vec<Arc<TlsQueue>>>,
    orphans: Mutex<Vec<Arc<TlsQueue>>>,
    /// Addresses of orphans whose sentinel has executed. Pushed only from
    /// entries running on the I/O thread, drained by `retire_marked`.
    to_destroy: Mutex<Vec<usize>>,
    max_threads: usize,
}

impl Registry {
    pub(crate) fn new(max_threads: usize) -> Self {
        Self {
            registered: Mutex::new(Vec::new()),
            orphans: Mutex::new(Vec::new()),
            to_destroy: Mutex::new(Vec::new()),
            max_threads,
        }
    }

    /// Registers a live queue. Crossing the configured maximum returns the
    /// over-capacity warning for the caller to report; registration itself
    /// always proceeds — the ring still services extra producers through
    /// its retry path, just with more contention.
    pub(crate) fn register(&self, queue: Arc<TlsQueue>) -> Option<LogError> {
        let mut registered = self.registered.lock().unwrap();
        let warning = if registered.len() >= self.max_threads {
            Some(LogError::OverCapacity {
                registered: registered.len() + 1,
                max: self.max_threads,
            })
        } else {
            None
        };
        registered.push(queue);
        warning
    }

    /// Moves a queue from the registered set into the orphanage. Orphanage
    /// first, so a concurrent counter sweep never finds a gap. The caller
    /// submits the orphan's sentinel entry afterwards.
    pub(crate) fn unregister(&self, queue: Arc<TlsQueue>) {
        let addr = Arc::as_ptr(&queue) as usize;
        self.orphans.lock().unwrap().push(queue);
        self.registered
            .lock()
            .unwrap()
            .retain(|q| Arc::as_ptr(q) as usize != addr);
    }

    /// Sentinel body: collect the orphan's final counters and mark it for
    /// destruction. Runs on the I/O thread, after every entry the orphan
    /// submitted before it.
    pub(crate) fn mark_orphan_done(&self, addr: usize, stats: &ContentionStats) {
        {
            let orphans = self.orphans.lock().unwrap();
            if let Some(orphan) = orphans.iter().find(|q| Arc::as_ptr(q) as usize == addr) {
                stats.collect_from(orphan);
            }
        }
        self.to_destroy.lock().unwrap().push(addr);
    }

    /// Erases every orphan marked since the last call. Called by the I/O
    /// thread at the end of its iteration, after drain and flush.
    pub(crate) fn retire_marked(&self) {
        let marked = {
            let mut to_destroy = self.to_destroy.lock().unwrap();
            if to_destroy.is_empty() {
                return;
            }
            std::mem::take(&mut *to_destroy)
        };
        self.orphans
            .lock()
            .unwrap()
            .retain(|q| !marked.contains(&(Arc::as_ptr(q) as usize)));
    }

    /// Sweeps counters from every live and orphaned queue into the totals.
    pub(crate) fn collect_all(&self, stats: &ContentionStats) {
        for queue in self.registered.lock().unwrap().iter() {
            stats.collect_from(queue);
        }
        for queue in self.orphans.lock().unwrap().iter() {
            stats.collect_from(queue);
        }
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> (usize, usize) {
        (
            self.registered.lock().unwrap().len(),
            self.orphans.lock().unwrap().len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::SwapRing;

    fn queue() -> Arc<TlsQueue> {
        Arc::new(TlsQueue::new(0, Arc::new(SwapRing::new(4))))
    }

    #[test]
    fn unregister_moves_to_orphanage() {
        let registry = Registry::new(4);
        let q = queue();
        assert!(registry.register(q.clone()).is_none());
        assert_eq!(registry.counts(), (1, 0));

        registry.unregister(q.clone());
        assert_eq!(registry.counts(), (0, 1));
    }

    #[test]
    fn register_past_capacity_warns_but_proceeds() {
        let registry = Registry::new(2);
        assert!(registry.register(queue()).is_none());
        assert!(registry.register(queue()).is_none());

        let warning = registry.register(queue());
        assert!(matches!(
            warning,
            Some(LogError::OverCapacity {
                registered: 3,
                max: 2
            })
        ));
        assert_eq!(registry.counts(), (3, 0));
    }

    #[test]
    fn marked_orphans_are_retired() {
        let registry = Registry::new(4);
        let stats = ContentionStats::new();
        let q = queue();
        let addr = Arc::as_ptr(&q) as usize;
        assert!(registry.register(q.clone()).is_none());
        registry.unregister(q);

        registry.mark_orphan_done(addr, &stats);
        assert_eq!(registry.counts(), (0, 1), "destruction is deferred");
        registry.retire_marked();
        assert_eq!(registry.counts(), (0, 0));
    }

    #[test]
    fn retire_without_marks_is_a_noop() {
        let registry = Registry::new(4);
        let q = queue();
        assert!(registry.register(q.clone()).is_none());
        registry.unregister(q);
        registry.retire_marked();
        assert_eq!(registry.counts(), (0, 1));
    }
}
