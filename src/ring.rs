//! Swap-request ring: how producers tell the I/O thread "my write buffer
//! has content, swap me".
//!
//! A fixed array of `2·M` word slots. Each slot is either a `TlsQueue`
//! pointer (LSB 0: a pending request, readable) or an id tag
//! `(id << 1) | 1` (LSB 1: writable, waiting for the producer that drew
//! `id`). Ids are drawn from one monotonically increasing counter and map
//! to slots by modulo, so the id baked into a writable tag detects reuse:
//! a slow producer holding a stale id can never satisfy the CAS on a slot
//! that has since moved on.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{LogError, error_sync};
use crate::queue::TlsQueue;
use crate::registry::ContentionStats;
use crate::util::LinePadded;

/// Tag for a slot waiting to be claimed by the producer holding `id`.
#[inline]
fn writable_tag(id: usize) -> usize {
    (id << 1) | 0x1
}

/// Pointers to heap allocations are at least 2-byte aligned, so LSB 0
/// means "this is a pending request".
#[inline]
fn is_readable(word: usize) -> bool {
    word & 0x1 != 0x1
}

/// Lock-free announcement ring between all producers and the I/O thread.
pub(crate) struct SwapRing {
    slots: Box<[AtomicUsize]>,
    next_id: LinePadded<AtomicUsize>,
}

impl SwapRing {
    /// Ring with `2·max_threads` slots, all initially writable by the id
    /// that first maps onto them.
    pub(crate) fn new(max_threads: usize) -> Self {
        let count = max_threads * 2;
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(AtomicUsize::new(writable_tag(i)));
        }
        Self {
            slots: slots.into_boxed_slice(),
            next_id: LinePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Producer side: draw an id, claim its slot.
    ///
    /// The CAS almost always succeeds on the first attempt. It fails only
    /// when the drawn slot is still occupied by a request from a full lap
    /// ago — i.e. the consumer has not kept up — in which case a fresh id
    /// is drawn. With twice as many slots as producers the expected number
    /// of attempts is at most 2; the loop is unbounded only if the
    /// consumer is completely stalled, and each attempt is itself bounded
    /// and allocation-free.
    pub(crate) fn request(&self, queue: &TlsQueue) {
        let queue_word = queue as *const TlsQueue as usize;
        debug_assert!(is_readable(queue_word));
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let slot = id % self.slots.len();
            if self.slots[slot]
                .compare_exchange(
                    writable_tag(id),
                    queue_word,
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
            queue.note_slot_retry();
        }
    }

    /// Consumer side: take the request out of `slot` if its producer has
    /// finished publishing, recycling the slot for `next_id`.
    ///
    /// `None` means the producer is between its fetch-add and its CAS;
    /// the caller re-checks on a later tick.
    fn take(&self, slot: usize, next_id: usize) -> Option<*const TlsQueue> {
        let word = self.slots[slot].load(Ordering::Acquire);
        if !is_readable(word) {
            return None;
        }
        if self.slots[slot]
            .compare_exchange(
                word,
                writable_tag(next_id),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            // Only this consumer empties readable slots; producers only
            // fill writable ones. Failure here is a protocol bug.
            error_sync(&LogError::RingSlotCasAnomaly { slot }.to_string());
            debug_assert!(false, "ring slot recycle CAS failed");
        }
        Some(word as *const TlsQueue)
    }

    #[cfg(test)]
    fn slot_word(&self, slot: usize) -> usize {
        self.slots[slot].load(Ordering::Relaxed)
    }
}

/// A slot whose producer was caught mid-request; re-checked on later ticks.
struct SlotRetry {
    slot: usize,
    next_id: usize,
}

/// Consumer-private gather cursor and retry bookkeeping. Owned by the I/O
/// thread; holding the consumer state outside the ring keeps the ring
/// itself producer-shared-only.
pub(crate) struct GatherState {
    /// Next request id to consume.
    cursor: usize,
    retries: Vec<SlotRetry>,
}

impl GatherState {
    pub(crate) fn new() -> Self {
        Self {
            cursor: 0,
            retries: Vec::new(),
        }
    }

    /// Collects every queue that has announced a swap since the last call,
    /// appending to `out`. Slots still mid-publication go on the retry
    /// list; the retry list is swept first so a slow producer from an
    /// earlier tick is picked up as soon as it finishes.
    pub(crate) fn gather(
        &mut self,
        ring: &SwapRing,
        stats: &ContentionStats,
        out: &mut Vec<*const TlsQueue>,
    ) {
        let pending = mem::take(&mut self.retries);
        for retry in pending {
            match ring.take(retry.slot, retry.next_id) {
                Some(queue) => out.push(queue),
                None => {
                    stats.slot_retry_retry.fetch_add(1, Ordering::Relaxed);
                    self.retries.push(retry);
                }
            }
        }

        let end = ring.next_id.load(Ordering::Acquire);
        while self.cursor < end {
            let id = self.cursor;
            self.cursor += 1;
            let slot = id % ring.len();
            let next_id = id + ring.len();
            match ring.take(slot, next_id) {
                Some(queue) => out.push(queue),
                None => {
                    stats.slot_retry.fetch_add(1, Ordering::Relaxed);
                    match self.retries.iter_mut().find(|r| r.slot == slot) {
                        // The slot was already being retried when its turn
                        // came around again: keep one entry per slot and
                        // just advance the id it will be recycled to.
                        Some(existing) => {
                            existing.next_id = next_id;
                            stats.slot_reencounter.fetch_add(1, Ordering::Relaxed);
                        }
                        None => self.retries.push(SlotRetry { slot, next_id }),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn queue(ring: &Arc<SwapRing>) -> TlsQueue {
        TlsQueue::new(0, ring.clone())
    }

    #[test]
    fn tag_encoding() {
        assert!(!is_readable(writable_tag(0)));
        assert!(!is_readable(writable_tag(17)));
        assert_eq!(writable_tag(5) >> 1, 5);
        // Any aligned pointer reads as a request.
        let x = 0u64;
        assert!(is_readable(&x as *const u64 as usize));
    }

    #[test]
    fn request_then_gather() {
        let ring = Arc::new(SwapRing::new(2));
        let q = queue(&ring);
        ring.request(&q);

        let mut state = GatherState::new();
        let stats = ContentionStats::new();
        let mut out = Vec::new();
        state.gather(&ring, &stats, &mut out);
        assert_eq!(out, vec![&q as *const TlsQueue]);

        // Nothing new on a second sweep.
        out.clear();
        state.gather(&ring, &stats, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn slot_tags_increase_monotonically() {
        let ring = Arc::new(SwapRing::new(1));
        let q = queue(&ring);
        let mut state = GatherState::new();
        let stats = ContentionStats::new();
        let mut out = Vec::new();

        // Drive several full laps through the 2-slot ring and watch slot 0.
        let mut last_tag_id = 0;
        for lap in 0..8 {
            ring.request(&q);
            ring.request(&q);
            state.gather(&ring, &stats, &mut out);
            let word = ring.slot_word(0);
            assert!(!is_readable(word), "slot must be writable after gather");
            let tag_id = word >> 1;
            if lap > 0 {
                assert!(tag_id > last_tag_id);
            }
            last_tag_id = tag_id;
        }
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn gather_is_empty_on_fresh_ring() {
        let ring = SwapRing::new(4);
        let mut state = GatherState::new();
        let stats = ContentionStats::new();
        let mut out = Vec::new();
        state.gather(&ring, &stats, &mut out);
        assert!(out.is_empty());
    }
}
