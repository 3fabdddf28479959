//! Lock-free ring buffer between the aggregator and a slow sink
//!
//! `submit` runs on the application thread that closed the root operation. A
//! sink that writes files or talks to a remote collector would stall that
//! thread, so this sink only enqueues the summary and a sidecar thread drains
//! batches into the inner sink.
//!
//! ```text
//! application thread                  sidecar thread
//!   end(root) → aggregator.submit()     loop {
//!     → ring_buffer.consume()             batch = queue.pop() x BATCH_SIZE
//!         ArrayQueue::push  ─────────▶    inner.consume(each)
//!                                         sleep when idle
//!                                       }
//! ```
//!
//! When the queue is full the summary is dropped and counted; the application
//! thread never blocks. `shutdown` waits for pushes already past the flag check
//! and delivers anything the sidecar left behind, so every accepted summary is
//! delivered exactly once.

use super::{OperationSink, OperationSummary};
use crate::detector::panic_message;
use crossbeam::queue::ArrayQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

const BATCH_SIZE: usize = 64;
const IDLE_SLEEP_MS: u64 = 5;

/// Bounded queue plus sidecar thread feeding an inner sink
///
/// # Example
/// ```
/// use racimo::aggregator::{Aggregator, CollectingSink, SummaryRingBuffer};
/// use racimo::record::{OperationId, OperationRecord};
/// use std::sync::Arc;
///
/// let collected = Arc::new(CollectingSink::new());
/// let buffer = Arc::new(SummaryRingBuffer::new(256, collected.clone()));
///
/// let aggregator = Aggregator::default();
/// aggregator.add_sink(buffer.clone());
///
/// let mut record = OperationRecord::new(OperationId::next(), "export", None, 0);
/// record.close(10, None);
/// aggregator.submit(record);
///
/// buffer.shutdown();
/// assert_eq!(collected.len(), 1);
/// ```
pub struct SummaryRingBuffer {
    queue: Arc<ArrayQueue<Arc<OperationSummary>>>,
    sidecar: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    inner: Arc<dyn OperationSink>,
    pushes_in_flight: AtomicUsize,
    total_pushed: AtomicU64,
    total_dropped: AtomicU64,
    total_delivered: Arc<AtomicU64>,
}

impl SummaryRingBuffer {
    /// Create a buffer holding up to `capacity` pending summaries
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize, inner: Arc<dyn OperationSink>) -> Self {
        assert!(capacity > 0, "Ring buffer capacity must be > 0");

        let queue = Arc::new(ArrayQueue::new(capacity));
        let shutdown = Arc::new(AtomicBool::new(false));
        let total_delivered = Arc::new(AtomicU64::new(0));

        let worker_queue = Arc::clone(&queue);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker_delivered = Arc::clone(&total_delivered);
        let worker_inner = Arc::clone(&inner);
        let sidecar = thread::Builder::new()
            .name("racimo-sink".to_string())
            .spawn(move || {
                Self::sidecar_worker(worker_queue, worker_shutdown, worker_delivered, worker_inner)
            })
            .map_err(|err| warn!("failed to spawn ring buffer sidecar: {}", err))
            .ok();

        Self {
            queue,
            sidecar: Mutex::new(sidecar),
            shutdown,
            inner,
            pushes_in_flight: AtomicUsize::new(0),
            total_pushed: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_delivered,
        }
    }

    /// Enqueue a summary; drops it when the buffer is full
    pub fn push(&self, summary: Arc<OperationSummary>) -> bool {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.pushes_in_flight.fetch_add(1, Ordering::SeqCst);

        let accepted = if self.shutdown.load(Ordering::SeqCst) {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            match self.queue.push(summary) {
                Ok(()) => true,
                Err(dropped) => {
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        operation = %dropped.record.id,
                        "summary ring buffer full, summary dropped"
                    );
                    false
                }
            }
        };

        self.pushes_in_flight.fetch_sub(1, Ordering::SeqCst);
        accepted
    }

    /// Stop the sidecar after it drains everything still queued
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let handle = match self.sidecar.lock() {
            Ok(mut sidecar) => sidecar.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        // a push that saw the flag unset may still be enqueueing
        while self.pushes_in_flight.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        while let Some(summary) = self.queue.pop() {
            Self::deliver(self.inner.as_ref(), &summary);
            self.total_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    fn sidecar_worker(
        queue: Arc<ArrayQueue<Arc<OperationSummary>>>,
        shutdown: Arc<AtomicBool>,
        delivered: Arc<AtomicU64>,
        inner: Arc<dyn OperationSink>,
    ) {
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        loop {
            let stopping = shutdown.load(Ordering::SeqCst);

            while let Some(summary) = queue.pop() {
                batch.push(summary);
                if batch.len() >= BATCH_SIZE {
                    break;
                }
            }

            if !batch.is_empty() {
                for summary in batch.drain(..) {
                    Self::deliver(inner.as_ref(), &summary);
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }

            if stopping {
                break;
            }
            thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
        }
    }

    fn deliver(inner: &dyn OperationSink, summary: &Arc<OperationSummary>) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| inner.consume(summary))) {
            warn!(
                sink = inner.name(),
                "buffered sink panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }
}

impl OperationSink for SummaryRingBuffer {
    fn name(&self) -> &str {
        "ring_buffer"
    }

    fn consume(&self, summary: &Arc<OperationSummary>) {
        self.push(Arc::clone(summary));
    }
}

impl Drop for SummaryRingBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub total_pushed: u64,
    pub total_dropped: u64,
    pub total_delivered: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl BufferStats {
    /// Drop rate (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        if self.total_pushed == 0 {
            0.0
        } else {
            self.total_dropped as f64 / self.total_pushed as f64
        }
    }

    /// Buffer utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.current_size as f64 / self.capacity as f64
    }
}
