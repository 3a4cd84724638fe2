//! The logger core: wiring between producers, the swap ring, the registry
//! and the I/O thread, plus the control-plane lifecycle calls.

use std::cell::Cell;
use std::io::Write;
use std::marker::PhantomData as marker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{LogError, error_sync};
use crate::io_thread::{IoState, IoThread};
use crate::queue::TlsQueue;
use crate::registry::{ContentionStats, Registry};
use crate::ring::SwapRing;
use crate::signal::FlushSignal;
use crate::sink::AsyncLog;

/// Builder for a [`Logger`].
pub struct Builder {
    poll_period: Duration,
    max_threads: usize,
}

impl Builder {
    /// Defaults: 10 ms poll period, room for 1024 concurrent producers.
    pub fn new() -> Self {
        Self {
            poll_period: Duration::from_millis(10),
            max_threads: 1024,
        }
    }

    /// How long the I/O thread sleeps between iterations.
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Maximum concurrent producers the ring is sized for (`2·max` slots).
    /// Going over is tolerated, at the cost of ring contention.
    pub fn max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    /// Builds the logger. The I/O thread is not started yet.
    pub fn build(self) -> Arc<Logger> {
        // At least one producer slot, or the ring modulo degenerates.
        let max_threads = self.max_threads.max(1);
        Arc::new(Logger {
            poll_period: self.poll_period,
            ring: Arc::new(SwapRing::new(max_threads)),
            registry: Registry::new(max_threads),
            stats: ContentionStats::new(),
            async_log: Mutex::new(AsyncLog::new()),
            keep_alive: Mutex::new(false),
            wake: Condvar::new(),
            io_state: Mutex::new(Some(IoState::new())),
            io_handle: Mutex::new(None),
            io_thread_id: Mutex::new(None),
            next_tid: AtomicUsize::new(0),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// The deferred-logging core. Owns every queue (directly through the
/// registry or via the orphanage), the swap ring, and the `AsyncLog` sink;
/// producers hold only a borrowed path in through their [`ProducerHandle`].
pub struct Logger {
    pub(crate) poll_period: Duration,
    pub(crate) ring: Arc<SwapRing>,
    pub(crate) registry: Registry,
    pub(crate) stats: ContentionStats,
    pub(crate) async_log: Mutex<AsyncLog>,
    pub(crate) keep_alive: Mutex<bool>,
    pub(crate) wake: Condvar,
    /// Consumer state parked between runs of the I/O thread. `None` only
    /// while a run owns it.
    pub(crate) io_state: Mutex<Option<IoState>>,
    io_handle: Mutex<Option<JoinHandle<()>>>,
    io_thread_id: Mutex<Option<ThreadId>>,
    next_tid: AtomicUsize,
}

impl Logger {
    /// Starts building a logger.
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn io_alive(&self) -> bool {
        *self.keep_alive.lock().unwrap()
    }

    fn on_io_thread(&self) -> bool {
        *self.io_thread_id.lock().unwrap() == Some(thread::current().id())
    }

    /// Creates and registers a queue for the calling thread. The returned
    /// handle is this thread's submission path; dropping it performs the
    /// orphan handoff, so entries submitted before the drop are still
    /// delivered.
    pub fn register_producer(self: &Arc<Self>) -> ProducerHandle {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(TlsQueue::new(tid, self.ring.clone()));
        if let Some(warning) = self.registry.register(queue.clone()) {
            error_sync(&format!("warning: {}", warning));
        }
        ProducerHandle {
            logger: self.clone(),
            queue,
            _not_sync: marker,
        }
    }

    /// Spawns the consumer thread. No-op (reported) if already running.
    pub fn start_io_thread(self: &Arc<Self>) {
        let mut io_handle = self.io_handle.lock().unwrap();
        if io_handle.is_some() {
            error_sync("start_io_thread: I/O thread already running");
            return;
        }
        *self.keep_alive.lock().unwrap() = true;
        // Resume from the parked consumer state: the ring cursor and any
        // deferred work survive a stop/start cycle.
        let state = self
            .io_state
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(IoState::new);
        let io = IoThread::new(self.clone(), state);
        let handle = thread::spawn(move || io.run());
        *self.io_thread_id.lock().unwrap() = Some(handle.thread().id());
        *io_handle = Some(handle);
    }

    /// Stops and joins the consumer thread. Entries still sitting in
    /// queues or orphans are not drained — they are retained and will be
    /// delivered if the thread is started again, or dropped with the
    /// logger.
    pub fn stop_io_thread(&self) {
        {
            let mut keep_alive = self.keep_alive.lock().unwrap();
            *keep_alive = false;
            self.wake.notify_all();
        }
        if let Some(handle) = self.io_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.io_thread_id.lock().unwrap() = None;
    }

    /// Installs the summary and detail output sinks.
    pub fn start_logging(
        &self,
        summary: Box<dyn Write + Send>,
        detail: Box<dyn Write + Send>,
    ) -> Result<(), LogError> {
        // The sink is locked for a whole drain phase, so touching it from
        // an entry closure would deadlock.
        if self.on_io_thread() {
            error_sync("start_logging not supported from the I/O thread");
            return Err(LogError::FromIoThread);
        }
        self.async_log.lock().unwrap().set_log_sinks(summary, detail);
        Ok(())
    }

    /// Reports the aggregated contention counters to the detail sink,
    /// waits until everything this call submitted has executed on the I/O
    /// thread, then resets both sinks to stderr.
    ///
    /// Requires a running I/O thread (the barrier would otherwise never
    /// execute). Calling from the I/O thread itself would self-deadlock
    /// and is rejected.
    pub fn stop_logging(self: &Arc<Self>) -> Result<(), LogError> {
        if self.on_io_thread() {
            error_sync("stop_logging not supported from the I/O thread");
            return Err(LogError::FromIoThread);
        }

        let producer = self.register_producer();
        let logger = Arc::downgrade(self);
        producer.submit(move |log| {
            let Some(logger) = logger.upgrade() else {
                return;
            };
            logger.registry.collect_all(&logger.stats);
            let stats = &logger.stats;
            log.detail("Log contention counters:");
            let counters = [
                (&stats.slot_retry, "swap_request_slot_retry_count"),
                (&stats.slot_retry_retry, "swap_request_slot_retry_retry_count"),
                (&stats.slot_reencounter, "swap_request_slot_reencounter_count"),
                (&stats.start_reading_retry, "start_reading_retry_count"),
                (&stats.queue_cas_fail, "queue_cas_fail_count"),
                (&stats.queue_slot_retry, "queue_slot_retry_count"),
            ];
            for (counter, name) in counters {
                log.detail(&format!("{} : {}", counter.load(Ordering::Relaxed), name));
            }
        });
        self.barrier(&producer);
        drop(producer);

        self.async_log.lock().unwrap().reset_log_sinks();
        Ok(())
    }

    /// Installs a trace sink; event timestamps are relative to `origin`.
    pub fn start_new_trace(
        &self,
        trace: Box<dyn Write + Send>,
        origin: Instant,
    ) -> Result<(), LogError> {
        if self.on_io_thread() {
            error_sync("start_new_trace not supported from the I/O thread");
            return Err(LogError::FromIoThread);
        }
        self.async_log
            .lock()
            .unwrap()
            .start_new_trace(Some(trace), origin);
        Ok(())
    }

    /// Waits until every trace event this thread submitted has been
    /// emitted, then turns tracing off.
    pub fn stop_tracing(self: &Arc<Self>) -> Result<(), LogError> {
        if self.on_io_thread() {
            error_sync("stop_tracing not supported from the I/O thread");
            return Err(LogError::FromIoThread);
        }

        let producer = self.register_producer();
        self.barrier(&producer);
        drop(producer);

        self.async_log
            .lock()
            .unwrap()
            .start_new_trace(None, Instant::now());
        Ok(())
    }

    /// Submits an entry that rings a one-shot signal and parks until the
    /// I/O thread has executed it. Everything the producer submitted
    /// earlier has been delivered by then.
    fn barrier(&self, producer: &ProducerHandle) {
        let signal = Arc::new(FlushSignal::new());
        let notify = signal.clone();
        producer.submit(move |_log| notify.notify());
        signal.wait();
    }
}

/// A producer thread's path into a [`Logger`].
///
/// Neither `Sync` nor `Clone`: the queue behind it keeps producer-private
/// state, so exactly one thread may submit through it at a time (moving it
/// to another thread is fine). Dropping the handle hands the queue to the
/// orphanage and queues a final sentinel entry, so the owning thread can
/// exit immediately while its remaining entries are still delivered.
pub struct ProducerHandle {
    logger: Arc<Logger>,
    queue: Arc<TlsQueue>,
    _not_sync: marker<Cell<()>>,
}

impl ProducerHandle {
    /// Submits one deferred entry. Wait-free; never blocks on the I/O
    /// thread, never performs I/O.
    #[inline]
    pub fn submit(&self, entry: impl FnOnce(&mut AsyncLog) + Send + 'static) {
        self.queue.submit(Box::new(entry));
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        // Orphanage first, then the sentinel through the queue itself: when
        // the sentinel runs on the I/O thread, every entry this producer
        // submitted has been delivered and the orphan may be destroyed.
        self.logger.registry.unregister(self.queue.clone());
        let addr = Arc::as_ptr(&self.queue) as usize;
        let logger = Arc::downgrade(&self.logger);
        self.queue.submit(Box::new(move |_log| {
            if let Some(logger) = logger.upgrade() {
                logger.registry.mark_orphan_done(addr, &logger.stats);
            }
        }));
    }
}
