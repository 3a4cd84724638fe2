//! Per-producer double-buffered entry queue.
//!
//! Each producer thread owns one `TlsQueue`. One buffer is always reserved
//! for the producer's appends and the other for the I/O thread's reads; the
//! producer announces "swap me" through the [`SwapRing`] and the I/O thread
//! performs the actual role swap once it has finished reading. The producer
//! side makes forward progress unconditionally: it can always lock one of
//! the two buffers in a bounded number of attempts, and notification is a
//! single ring CAS.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::vec::Drain;

use crate::error::{LogError, error_sync};
use crate::ring::SwapRing;
use crate::sink::AsyncLog;
use crate::util::LinePadded;

/// A deferred log entry: a move-only closure executed exactly once on the
/// I/O thread, in submission order relative to its own producer. It must
/// own every piece of data it will emit.
pub type LogEntry = Box<dyn FnOnce(&mut AsyncLog) + Send>;

const UNLOCKED: u8 = 0;
const READ_LOCK: u8 = 1;
const WRITE_LOCK: u8 = 2;

/// Double-buffered queue of deferred entries for a single producer thread.
///
/// Field roles:
/// - `entries`/`states`/`i_write`: shared between producer and consumer,
///   coordinated through the per-buffer state words.
/// - `i_write_prev`: producer-private.
/// - `i_read`/`unread_swaps`: consumer-private.
pub(crate) struct TlsQueue {
    entries: [UnsafeCell<Vec<LogEntry>>; 2],
    states: [AtomicU8; 2],
    i_write: LinePadded<AtomicUsize>,

    /// Last write index the producer observed. A change means a swap
    /// happened, so the freshly appended buffer needs a swap request.
    i_write_prev: UnsafeCell<usize>,

    /// Swaps performed but not yet fully drained. 0 or 1.
    unread_swaps: UnsafeCell<usize>,
    i_read: UnsafeCell<usize>,

    cas_fail_count: AtomicUsize,
    slot_retry_count: AtomicUsize,

    /// Cached `"pid": .., "tid": .., ` attribution, built once.
    pid_tid: String,

    ring: Arc<SwapRing>,
}

// SAFETY: the shared fields are coordinated through `states` (acquire on
// lock-taking CAS, release on lock-dropping CAS). `i_write_prev` is touched
// only by the owning producer, `i_read`/`unread_swaps` only by the single
// I/O thread; callers uphold this split (see `ProducerHandle` and
// `IoThread`).
unsafe impl Send for TlsQueue {}
unsafe impl Sync for TlsQueue {}

impl TlsQueue {
    pub(crate) fn new(tid: usize, ring: Arc<SwapRing>) -> Self {
        let pid = std::process::id();
        Self {
            entries: [UnsafeCell::new(Vec::new()), UnsafeCell::new(Vec::new())],
            // Buffer 0 starts read-locked, buffer 1 is the write target.
            states: [AtomicU8::new(READ_LOCK), AtomicU8::new(UNLOCKED)],
            i_write: LinePadded::new(AtomicUsize::new(1)),
            i_write_prev: UnsafeCell::new(0),
            unread_swaps: UnsafeCell::new(0),
            i_read: UnsafeCell::new(0),
            cas_fail_count: AtomicUsize::new(0),
            slot_retry_count: AtomicUsize::new(0),
            pid_tid: format!("\"pid\": {}, \"tid\": {}, ", pid, tid),
            ring,
        }
    }

    /// Appends an entry to the current write buffer and, if this append
    /// landed in a different buffer than the previous one, announces a swap
    /// request on the ring.
    ///
    /// Wait-free: no locks, no syscalls, no waiting on the I/O thread. Must
    /// only be called from the thread owning this queue (enforced by
    /// `ProducerHandle` being neither `Sync` nor `Clone`).
    #[inline]
    pub(crate) fn submit(&self, entry: LogEntry) {
        let mut i_write = self.i_write.load(Ordering::Relaxed);
        let mut fails = 0usize;
        while self.states[i_write]
            .compare_exchange(UNLOCKED, WRITE_LOCK, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            i_write ^= 1;
            fails += 1;
            // Up to 3 attempts can be needed: the consumer read-locks at
            // most one buffer, we write-lock at most one, and the relaxed
            // i_write load above can be stale by at most one swap. A fourth
            // failure means the state machine is broken.
            if fails >= 3 {
                error_sync(&LogError::ProducerInvariant { attempts: fails }.to_string());
                debug_assert!(fails < 3, "double-buffer state machine violated");
            }
            self.cas_fail_count.fetch_add(1, Ordering::Relaxed);
        }

        // SAFETY: the WriteLock just taken gives this thread exclusive
        // access to the buffer until the release CAS below.
        unsafe {
            (*self.entries[i_write].get()).push(entry);
        }

        if self.states[i_write]
            .compare_exchange(WRITE_LOCK, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // Nothing else may touch a write-locked buffer's state.
            error_sync("submit: write unlock CAS failed");
            debug_assert!(false, "write unlock CAS failed");
        }

        // SAFETY: producer-private, and submit is single-threaded per queue.
        let i_write_prev = unsafe { &mut *self.i_write_prev.get() };
        if *i_write_prev != i_write {
            *i_write_prev = i_write;
            self.ring.request(self);
        }
    }

    /// Swaps buffer roles: releases the drained read buffer back to the
    /// producer and claims the previously written one for reading.
    ///
    /// # Safety
    ///
    /// Single consumer only, and only after [`read_buffer_consumed`]
    /// returned true. Swaps of one queue must be serialized through one
    /// I/O thread; a second consumer would break the producer's 3-CAS bound.
    ///
    /// [`read_buffer_consumed`]: TlsQueue::read_buffer_consumed
    pub(crate) unsafe fn swap_buffers(&self) {
        // SAFETY: consumer-private fields, single consumer per contract.
        let i_read = unsafe { &mut *self.i_read.get() };
        let unread_swaps = unsafe { &mut *self.unread_swaps.get() };

        if self.states[*i_read]
            .compare_exchange(READ_LOCK, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            error_sync("swap_buffers: read unlock CAS failed");
            debug_assert!(false, "read unlock CAS failed");
        }

        // The release CAS above is the cross-thread publication point; the
        // producer synchronizes through the state word, so relaxed is
        // enough for the index itself.
        self.i_write.store(*i_read, Ordering::Relaxed);
        *i_read ^= 1;
        *unread_swaps += 1;
    }

    /// Tries to read-lock the current read buffer. `None` means the
    /// producer is mid-append in it; try again next iteration.
    ///
    /// # Safety
    ///
    /// Single consumer only.
    pub(crate) unsafe fn start_reading(&self) -> Option<ReadBatch<'_>> {
        // SAFETY: consumer-private field, single consumer per contract.
        let i_read = unsafe { *self.i_read.get() };
        if self.states[i_read]
            .compare_exchange(UNLOCKED, READ_LOCK, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(ReadBatch { queue: self })
        } else {
            None
        }
    }

    /// True when the previous swap has been fully drained, i.e. another
    /// swap is allowed.
    ///
    /// # Safety
    ///
    /// Single consumer only.
    pub(crate) unsafe fn read_buffer_consumed(&self) -> bool {
        // SAFETY: consumer-private field, single consumer per contract.
        unsafe { *self.unread_swaps.get() == 0 }
    }

    pub(crate) fn pid_tid(&self) -> &str {
        &self.pid_tid
    }

    pub(crate) fn note_slot_retry(&self) {
        self.slot_retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drains the observed CAS-failure count (read-and-subtract, so counts
    /// accumulated after the report are not lost).
    pub(crate) fn report_cas_fails(&self) -> usize {
        let c = self.cas_fail_count.load(Ordering::Relaxed);
        self.cas_fail_count.fetch_sub(c, Ordering::Relaxed);
        c
    }

    /// Drains the observed ring-slot retry count.
    pub(crate) fn report_slot_retries(&self) -> usize {
        let c = self.slot_retry_count.load(Ordering::Relaxed);
        self.slot_retry_count.fetch_sub(c, Ordering::Relaxed);
        c
    }
}

/// An in-progress read of a queue's read buffer. Holds the ReadLock taken
/// by [`TlsQueue::start_reading`]; dropping it clears the buffer (keeping
/// its capacity) and marks the swap as consumed. The lock itself stays on
/// the buffer until the next swap releases it.
pub(crate) struct ReadBatch<'a> {
    queue: &'a TlsQueue,
}

impl ReadBatch<'_> {
    /// Drains the entries in submission order.
    pub(crate) fn drain(&mut self) -> Drain<'_, LogEntry> {
        // SAFETY: the ReadLock held by this batch gives the consumer
        // exclusive access to the read buffer.
        unsafe {
            let i_read = *self.queue.i_read.get();
            (*self.queue.entries[i_read].get()).drain(..)
        }
    }
}

impl Drop for ReadBatch<'_> {
    fn drop(&mut self) {
        // SAFETY: as in drain; plus unread_swaps is consumer-private and a
        // ReadBatch only exists on the consumer thread.
        unsafe {
            let i_read = *self.queue.i_read.get();
            (*self.queue.entries[i_read].get()).clear();
            *self.queue.unread_swaps.get() -= 1;
        }
    }
}
