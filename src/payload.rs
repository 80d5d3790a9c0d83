use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::reading::MetricKind;

/// A reusable wire buffer holding one framed batch of readings for one
/// endpoint.
///
/// A payload is owned by exactly one of: the free pool, the writer that
/// is filling it, the pending queue, or the retry queue.
#[derive(Debug)]
pub struct Payload {
    pub(crate) data: Vec<u8>,
    pub(crate) metrics_count: usize,
    pub(crate) send_attempts: u32,
    pub(crate) batch_key: Option<MetricKind>,
}

impl Payload {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            metrics_count: 0,
            send_attempts: 0,
            batch_key: None,
        }
    }

    fn reset(&mut self) {
        self.data.clear();
        self.metrics_count = 0;
        self.send_attempts = 0;
        self.batch_key = None;
    }

    /// The framed bytes accumulated so far.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// How many readings the buffer holds.
    #[must_use]
    pub fn metrics_count(&self) -> usize {
        self.metrics_count
    }

    /// How many times this payload has been handed to the transport.
    #[must_use]
    pub fn send_attempts(&self) -> u32 {
        self.send_attempts
    }
}

#[derive(Default)]
struct Lists {
    free: Vec<Payload>,
    pending: VecDeque<Payload>,
    retry: VecDeque<Payload>,
    allocated: usize,
}

impl Lists {
    // Retries are older than anything pending, so they go first.
    fn drop_oldest(&mut self) -> Option<Payload> {
        self.retry.pop_front().or_else(|| self.pending.pop_front())
    }
}

/// The per-endpoint pool of payload buffers plus the pending and retry
/// queues, bounded by buffer count.
///
/// Writer threads never touch this type; only the collector's background
/// thread does, so the mutex is held for list manipulation only.
pub struct PayloadQueue {
    inner: Mutex<Lists>,
    payload_size: usize,
    max_payload_count: usize,
    dropped_total: AtomicU64,
}

impl PayloadQueue {
    pub(crate) fn new(payload_size: usize, max_payload_count: usize) -> Self {
        Self {
            inner: Mutex::new(Lists::default()),
            payload_size,
            max_payload_count: max_payload_count.max(1),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Hands out a writable payload. Never blocks: when the pool is at
    /// its bound the oldest queued payload is dropped and its buffer
    /// reused. Returns the payload and whether a drop was needed.
    pub(crate) fn get_free(&self) -> (Payload, bool) {
        let mut lists = self.inner.lock();
        if let Some(mut p) = lists.free.pop() {
            p.reset();
            return (p, false);
        }
        if lists.allocated < self.max_payload_count {
            lists.allocated += 1;
            return (Payload::with_capacity(self.payload_size), false);
        }
        match lists.drop_oldest() {
            Some(mut p) => {
                drop(lists);
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                p.reset();
                (p, true)
            }
            None => {
                // Every buffer is checked out; the bound still holds
                // because the caller owns what it gets back.
                lists.allocated += 1;
                (Payload::with_capacity(self.payload_size), false)
            }
        }
    }

    pub(crate) fn add_pending(&self, payload: Payload) {
        self.inner.lock().pending.push_back(payload);
    }

    /// Moves the whole pending list out as one batch.
    pub(crate) fn take_for_flush(&self) -> VecDeque<Payload> {
        std::mem::take(&mut self.inner.lock().pending)
    }

    /// Puts the unsent tail of an aborted flush back at the front of
    /// pending, preserving order and attempt counts.
    pub(crate) fn restore_pending(&self, batch: VecDeque<Payload>) {
        let mut lists = self.inner.lock();
        for payload in batch.into_iter().rev() {
            lists.pending.push_front(payload);
        }
    }

    /// Records a failed attempt. The payload is kept on the retry queue
    /// until it runs out of attempts, at which point it is released and
    /// counted as dropped. Returns whether the payload survived.
    pub(crate) fn retry(&self, mut payload: Payload, max_retries: u32) -> bool {
        payload.send_attempts += 1;
        if payload.send_attempts >= max_retries {
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
            self.release(payload);
            return false;
        }
        self.inner.lock().retry.push_back(payload);
        true
    }

    /// Prepends the retry queue onto pending so the oldest payloads
    /// flush first.
    pub(crate) fn merge_retry(&self) {
        let mut lists = self.inner.lock();
        while let Some(p) = lists.retry.pop_back() {
            lists.pending.push_front(p);
        }
    }

    /// Returns a payload's buffer to the free pool.
    pub(crate) fn release(&self, mut payload: Payload) {
        payload.reset();
        self.inner.lock().free.push(payload);
    }

    /// Releases a payload that is being thrown away, counting the drop.
    pub(crate) fn release_dropped(&self, payload: Payload) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
        self.release(payload);
    }

    /// Total payloads dropped over the queue's lifetime, monotonic.
    pub(crate) fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }
}
