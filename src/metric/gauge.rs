use std::any::Any;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use super::{Metric, MetricHeader};
use crate::reading::{MetricKind, RateKind};
use crate::tags::TagSet;
use crate::time::Timestamp;
use crate::writer::MetricWriter;
use crate::{MetricResult, MetricsError};

// u64::MAX is a NaN bit pattern, reserved here as the "never recorded"
// sentinel.
const UNSET_BITS: u64 = u64::MAX;

/// A last-value-wins gauge. Writers store atomically; each snapshot
/// emits the most recent value, or nothing if none was ever recorded.
pub struct SamplingGauge {
    header: MetricHeader,
    bits: AtomicU64,
    window: AtomicU64,
}

impl SamplingGauge {
    /// A detached sampling gauge with the given tags.
    #[must_use]
    pub fn new(tags: TagSet) -> Self {
        Self {
            header: MetricHeader::new(tags),
            bits: AtomicU64::new(UNSET_BITS),
            window: AtomicU64::new(UNSET_BITS),
        }
    }

    /// Records the current level.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn record(&self, value: f64) -> MetricResult<()> {
        self.header.active()?;
        let mut bits = value.to_bits();
        if bits == UNSET_BITS {
            bits = f64::NAN.to_bits();
        }
        self.bits.store(bits, Ordering::Relaxed);
        Ok(())
    }
}

impl Metric for SamplingGauge {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Gauge
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::Gauge
    }

    fn pre_serialize(&self) {
        self.window.store(self.bits.load(Ordering::Acquire), Ordering::Release);
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp) {
        let bits = self.window.load(Ordering::Acquire);
        if bits == UNSET_BITS {
            return;
        }
        if let Some(reading) = self.header.reading(
            Cow::Borrowed(""),
            MetricKind::Gauge,
            f64::from_bits(bits),
            now,
        ) {
            writer.record(&reading);
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A gauge that forwards every recorded event with its own timestamp.
///
/// Events are buffered in a lock-free bag that the snapshot swaps out
/// whole, so recording stays wait-free for writers and events are
/// serialized in arrival order.
#[derive(Debug)]
pub struct EventGauge {
    header: MetricHeader,
    bag: ArcSwap<SegQueue<(f64, Timestamp)>>,
    window: Mutex<Vec<(f64, Timestamp)>>,
}

impl EventGauge {
    /// A detached event gauge with the given tags.
    #[must_use]
    pub fn new(tags: TagSet) -> Self {
        Self {
            header: MetricHeader::new(tags),
            bag: ArcSwap::new(Arc::new(SegQueue::new())),
            window: Mutex::new(Vec::new()),
        }
    }

    /// Records an event stamped with the current time.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn record(&self, value: f64) -> MetricResult<()> {
        self.record_at(value, Timestamp::now())
    }

    /// Records an event with an explicit timestamp.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn record_at(&self, value: f64, at: Timestamp) -> MetricResult<()> {
        self.header.active()?;
        self.bag.load().push((value, at));
        Ok(())
    }
}

impl Metric for EventGauge {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Gauge
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::Gauge
    }

    fn pre_serialize(&self) {
        let old = self.bag.swap(Arc::new(SegQueue::new()));
        let mut window = self.window.lock();
        window.clear();
        while let Some(event) = old.pop() {
            window.push(event);
        }
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, _now: Timestamp) {
        for &(value, at) in self.window.lock().iter() {
            if let Some(reading) =
                self.header
                    .reading(Cow::Borrowed(""), MetricKind::Gauge, value, at)
            {
                writer.record(&reading);
            }
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A derived summary emitted by an [`AggregateGauge`], each with its own
/// wire suffix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// The most recently recorded sample, no suffix.
    Last,
    /// Number of samples in the window, `_count`.
    Count,
    /// Arithmetic mean, `_avg`.
    Mean,
    /// Nearest-rank median, `_median`.
    Median,
    /// Smallest sample, `_min`.
    Min,
    /// Largest sample, `_max`.
    Max,
    /// Sum of all samples, `_sum`.
    Sum,
    /// Nearest-rank percentile for `p` in (0, 1); suffix `_N` where `N`
    /// is `p` scaled to percent, e.g. `_99` or `_99.9`.
    Percentile(f64),
}

impl Aggregate {
    /// A validated percentile aggregate.
    ///
    /// # Errors
    /// Fails unless `p` lies strictly between 0 and 1.
    pub fn percentile(p: f64) -> MetricResult<Self> {
        if !(p > 0.0 && p < 1.0) {
            return Err(MetricsError::InvalidPercentile { p });
        }
        Ok(Self::Percentile(p))
    }

    fn suffix(self) -> Cow<'static, str> {
        match self {
            Self::Last => Cow::Borrowed(""),
            Self::Count => Cow::Borrowed("_count"),
            Self::Mean => Cow::Borrowed("_avg"),
            Self::Median => Cow::Borrowed("_median"),
            Self::Min => Cow::Borrowed("_min"),
            Self::Max => Cow::Borrowed("_max"),
            Self::Sum => Cow::Borrowed("_sum"),
            Self::Percentile(p) => {
                let scaled = p * 100.0;
                if (scaled - scaled.round()).abs() < 1e-9 {
                    #[allow(clippy::cast_possible_truncation)]
                    let whole = scaled.round() as i64;
                    Cow::Owned(format!("_{whole}"))
                } else {
                    Cow::Owned(format!("_{scaled}"))
                }
            }
        }
    }
}

// Nearest-rank: index = ceil(p * n) - 1, clamped to [0, n - 1].
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let raw = (p * sorted.len() as f64).ceil() as isize - 1;
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let index = raw.clamp(0, sorted.len() as isize - 1) as usize;
    sorted[index]
}

#[derive(Default)]
struct AggregateWindow {
    sorted: Vec<f64>,
    last: f64,
}

/// A gauge that records raw samples and emits the enabled summary
/// aggregates once per window.
///
/// Samples land in a lock-free bag that the snapshot swaps out and
/// sorts; a window with zero samples emits nothing.
pub struct AggregateGauge {
    header: MetricHeader,
    aggregates: Vec<Aggregate>,
    bag: ArcSwap<SegQueue<f64>>,
    window: Mutex<AggregateWindow>,
}

impl AggregateGauge {
    /// A detached aggregate gauge emitting the given aggregates.
    #[must_use]
    pub fn new(aggregates: Vec<Aggregate>, tags: TagSet) -> Self {
        Self {
            header: MetricHeader::new(tags),
            aggregates,
            bag: ArcSwap::new(Arc::new(SegQueue::new())),
            window: Mutex::new(AggregateWindow::default()),
        }
    }

    /// Records one sample.
    ///
    /// # Errors
    /// Fails when the metric is not attached or the collector is closed.
    pub fn record(&self, value: f64) -> MetricResult<()> {
        self.header.active()?;
        self.bag.load().push(value);
        Ok(())
    }
}

impl Metric for AggregateGauge {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Gauge
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::Gauge
    }

    fn pre_serialize(&self) {
        let old = self.bag.swap(Arc::new(SegQueue::new()));
        let mut window = self.window.lock();
        window.sorted.clear();
        while let Some(sample) = old.pop() {
            window.sorted.push(sample);
        }
        window.last = window.sorted.last().copied().unwrap_or(0.0);
        window
            .sorted
            .sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp) {
        let window = self.window.lock();
        let n = window.sorted.len();
        if n == 0 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        for aggregate in &self.aggregates {
            let value = match aggregate {
                Aggregate::Last => window.last,
                Aggregate::Count => n as f64,
                Aggregate::Mean => window.sorted.iter().sum::<f64>() / n as f64,
                Aggregate::Median => nearest_rank(&window.sorted, 0.5),
                Aggregate::Min => window.sorted[0],
                Aggregate::Max => window.sorted[n - 1],
                Aggregate::Sum => window.sorted.iter().sum(),
                Aggregate::Percentile(p) => nearest_rank(&window.sorted, *p),
            };
            if let Some(reading) =
                self.header
                    .reading(aggregate.suffix(), MetricKind::Gauge, value, now)
            {
                writer.record(&reading);
            }
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A gauge fed by a producer closure polled once per snapshot.
///
/// Returning `None` (or panicking) emits nothing that cycle.
pub struct SnapshotGauge {
    header: MetricHeader,
    producer: Box<dyn Fn() -> Option<f64> + Send + Sync>,
    window: Mutex<Option<f64>>,
}

impl SnapshotGauge {
    /// A detached snapshot gauge polling `producer`.
    #[must_use]
    pub fn new(tags: TagSet, producer: impl Fn() -> Option<f64> + Send + Sync + 'static) -> Self {
        Self {
            header: MetricHeader::new(tags),
            producer: Box::new(producer),
            window: Mutex::new(None),
        }
    }
}

impl Metric for SnapshotGauge {
    fn header(&self) -> &MetricHeader {
        &self.header
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Gauge
    }

    fn rate_kind(&self) -> RateKind {
        RateKind::Gauge
    }

    fn pre_serialize(&self) {
        let value = catch_unwind(AssertUnwindSafe(|| (self.producer)()))
            .ok()
            .flatten();
        *self.window.lock() = value;
    }

    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp) {
        let Some(value) = *self.window.lock() else {
            return;
        };
        if let Some(reading) =
            self.header
                .reading(Cow::Borrowed(""), MetricKind::Gauge, value, now)
        {
            writer.record(&reading);
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
