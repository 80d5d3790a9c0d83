use std::borrow::Cow;
use std::sync::Arc;

use crate::tags::ResolvedTags;
use crate::time::Timestamp;

/// The wire category of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A per-window delta.
    Counter,
    /// A monotonically growing total that is never reset.
    CumulativeCounter,
    /// A point-in-time measurement.
    Gauge,
}

impl MetricKind {
    /// Canonical lowercase name, as used by the SignalFx wire format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::CumulativeCounter => "cumulative_counter",
            Self::Gauge => "gauge",
        }
    }
}

/// How a metric's value should be interpreted over time, for metadata.
///
/// Determined by the metric type, never by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateKind {
    /// Deltas per reporting window.
    Counter,
    /// An externally computed rate snapshot.
    Rate,
    /// A point-in-time level.
    Gauge,
    /// A monotonic total.
    CumulativeCounter,
}

impl RateKind {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Rate => "rate",
            Self::Gauge => "gauge",
            Self::CumulativeCounter => "cumulative-counter",
        }
    }
}

/// A single serializable observation: one (name, suffix, value, tags,
/// timestamp) tuple destined for an endpoint. Immutable once built.
#[derive(Debug, Clone)]
pub struct MetricReading {
    /// The fully prefixed metric name, without suffix.
    pub name: Arc<str>,
    /// Aggregate suffix appended to the name on the wire; often empty.
    pub suffix: Cow<'static, str>,
    /// Wire category.
    pub kind: MetricKind,
    /// The observed value.
    pub value: f64,
    /// The canonicalized tag set shared with the owning metric.
    pub tags: Arc<ResolvedTags>,
    /// When the observation was taken.
    pub timestamp: Timestamp,
}

/// Uniquely identifies a live metric: full name plus canonical tag
/// string. At most one metric may be registered per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// Configured prefix + user-supplied name.
    pub full_name: String,
    /// The sorted canonical JSON encoding of the merged tag set.
    pub tags_canonical: String,
}

/// Descriptive metadata for one metric name, pushed to endpoints on the
/// metadata interval and used to detect conflicting registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    /// The fully prefixed metric name.
    pub full_name: String,
    /// Unit of measurement, free-form.
    pub unit: String,
    /// Human-readable description.
    pub description: String,
    /// How values relate across windows.
    pub rate_kind: RateKind,
}
