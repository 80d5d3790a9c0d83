use std::any::Any;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Metric, MetricHeader};
use crate::reading::{MetricKind, RateKind};
use crate::tags::TagSet;
use crate::time::Timestamp;
use crate::writer::MetricWriter;
use crate::MetricResult;

/// A per-window counter. Writers add atomically; each snapshot emits the
/// delta accumulated since the previous one and resets to zero.
#[derive(Debug)]
pub struct Counter {
    header: MetricHeader,
    value: AtomicI64,
    window: AtomicI64,
}

impl Counter {
    /// A detached counter with the given tags.
    #[must_use]
    pub fn new(tags: TagSet) -> Self {
        Self {
            header: MetricHeader::new(tags),
            value: AtomicI64::new(0),
            window: AtomicI64::new(0),
        }
    }

    /// Adds one.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn increment(&self) -> MetricResult<()> {
        self.add(1)
    }

    /// Adds `delta`.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn add(&self, delta: i64) -> MetricResult<()> {
        self.header.active()?;
        self.value.fetch_add(delta, Ordering::Relaxed);
        Ok(())
    }
}

impl Metric for Counter {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Counter
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::Counter
    }

    fn pre_serialize(&self) {
        let delta = self.value.swap(0, Ordering::AcqRel);
        self.window.store(delta, Ordering::Release);
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp) {
        let delta = self.window.load(Ordering::Acquire);
        if delta == 0 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        if let Some(reading) =
            self.header
                .reading(Cow::Borrowed(""), MetricKind::Counter, delta as f64, now)
        {
            writer.record(&reading);
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A counter whose total is never reset: each snapshot emits the running
/// absolute value. Survives windows, not process restarts.
pub struct CumulativeCounter {
    header: MetricHeader,
    value: AtomicI64,
    window: AtomicI64,
}

impl CumulativeCounter {
    /// A detached cumulative counter with the given tags.
    #[must_use]
    pub fn new(tags: TagSet) -> Self {
        Self {
            header: MetricHeader::new(tags),
            value: AtomicI64::new(0),
            window: AtomicI64::new(0),
        }
    }

    /// Adds one.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn increment(&self) -> MetricResult<()> {
        self.add(1)
    }

    /// Adds `delta` to the running total.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn add(&self, delta: i64) -> MetricResult<()> {
        self.header.active()?;
        self.value.fetch_add(delta, Ordering::Relaxed);
        Ok(())
    }

    /// The current running total.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for CumulativeCounter {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::CumulativeCounter
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::CumulativeCounter
    }

    fn pre_serialize(&self) {
        self.window.store(self.value.load(Ordering::Acquire), Ordering::Release);
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp) {
        let total = self.window.load(Ordering::Acquire);
        #[allow(clippy::cast_precision_loss)]
        if let Some(reading) = self.header.reading(
            Cow::Borrowed(""),
            MetricKind::CumulativeCounter,
            total as f64,
            now,
        ) {
            writer.record(&reading);
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A counter fed by a producer closure instead of explicit increments.
///
/// The closure is polled once per snapshot; returning `None` (or
/// panicking) emits nothing that cycle.
pub struct SnapshotCounter {
    header: MetricHeader,
    producer: Box<dyn Fn() -> Option<i64> + Send + Sync>,
    window: Mutex<Option<i64>>,
}

impl SnapshotCounter {
    /// A detached snapshot counter polling `producer`.
    #[must_use]
    pub fn new(tags: TagSet, producer: impl Fn() -> Option<i64> + Send + Sync + 'static) -> Self {
        Self {
            header: MetricHeader::new(tags),
            producer: Box::new(producer),
            window: Mutex::new(None),
        }
    }
}

impl Metric for SnapshotCounter {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Counter
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::Rate
    }

    fn pre_serialize(&self) {
        // A panicking producer is treated as producing nothing.
        let value = catch_unwind(AssertUnwindSafe(|| (self.producer)()))
            .ok()
            .flatten();
        *self.window.lock() = value;
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp) {
        let Some(value) = *self.window.lock() else {
            return;
        };
        #[allow(clippy::cast_precision_loss)]
        if let Some(reading) =
            self.header
                .reading(Cow::Borrowed(""), MetricKind::Counter, value as f64, now)
        {
            writer.record(&reading);
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
