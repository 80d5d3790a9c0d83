use std::any::Any;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::reading::{MetricKind, MetricReading, RateKind};
use crate::tags::{ResolvedTags, TagSet};
use crate::time::Timestamp;
use crate::writer::MetricWriter;
use crate::{MetricResult, MetricsError};

mod counter;
mod gauge;
mod group;

pub use counter::{Counter, CumulativeCounter, SnapshotCounter};
pub use gauge::{Aggregate, AggregateGauge, EventGauge, SamplingGauge, SnapshotGauge};
pub use group::MetricGroup;

pub(crate) const STATE_RUNNING: u8 = 0;
pub(crate) const STATE_DRAINING: u8 = 1;
pub(crate) const STATE_CLOSED: u8 = 2;

/// The polymorphic surface every metric type implements.
///
/// `pre_serialize` and `serialize` are called only from the collector's
/// background thread; the type-specific record/increment operations are
/// called from any number of writer threads. `pre_serialize` swaps the
/// live accumulator out so `serialize` observes a consistent window.
pub trait Metric: Send + Sync + 'static {
    /// The shared per-metric state.
    fn header(&self) -> &MetricHeader;

    /// Wire category of this metric's readings.
    fn kind(&self) -> MetricKind;

    /// How this metric's values relate across windows, for metadata.
    fn rate_kind(&self) -> RateKind;

    /// Captures the accumulated window. Runs once per snapshot, before
    /// any endpoint serializes.
    fn pre_serialize(&self);

    /// Emits the captured window's readings. Runs once per endpoint per
    /// snapshot; must not mutate the captured window.
    fn serialize(&self, writer: &mut MetricWriter<'_>, now: Timestamp);

    /// Upcast used by the registry to hand back typed instances.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[derive(Debug)]
pub(crate) struct Attachment {
    pub(crate) full_name: Arc<str>,
    pub(crate) tags: Arc<ResolvedTags>,
    pub(crate) collector_state: Arc<AtomicU8>,
}

/// State common to every metric: the declared tags and, once registered,
/// the attachment to a collector.
///
/// A metric rejects recordings until it is attached, and its tag values
/// never change afterwards.
#[derive(Debug)]
pub struct MetricHeader {
    declared: TagSet,
    attachment: OnceLock<Attachment>,
}

impl MetricHeader {
    /// A detached header carrying the declared tags.
    #[must_use]
    pub fn new(declared: TagSet) -> Self {
        Self {
            declared,
            attachment: OnceLock::new(),
        }
    }

    /// The tags declared at construction time.
    #[must_use]
    pub fn declared_tags(&self) -> &TagSet {
        &self.declared
    }

    /// Whether the metric has been registered with a collector.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attachment.get().is_some()
    }

    pub(crate) fn attach(&self, attachment: Attachment) -> bool {
        self.attachment.set(attachment).is_ok()
    }

    /// Fails unless the metric is attached to a collector that is still
    /// accepting recordings.
    pub(crate) fn active(&self) -> MetricResult<&Attachment> {
        let attachment = self.attachment.get().ok_or(MetricsError::NotAttached)?;
        if attachment.collector_state.load(Ordering::Relaxed) == STATE_CLOSED {
            return Err(MetricsError::Closed);
        }
        Ok(attachment)
    }

    /// Builds a reading for the attached metric; `None` when detached.
    pub(crate) fn reading(
        &self,
        suffix: Cow<'static, str>,
        kind: MetricKind,
        value: f64,
        timestamp: Timestamp,
    ) -> Option<MetricReading> {
        let attachment = self.attachment.get()?;
        Some(MetricReading {
            name: attachment.full_name.clone(),
            suffix,
            kind,
            value,
            tags: attachment.tags.clone(),
            timestamp,
        })
    }
}
